use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Sender;

/// Stream interchanges from a file, one per line, into a channel. Lines that
/// are not interchanges are skipped with a note rather than aborting the feed.
pub async fn stream_interchanges(path: &str, sender: Sender<String>) -> anyhow::Result<()> {
    let file = File::open(path).await?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with("ISA") {
            eprintln!("Skipping non-interchange line");
            continue;
        }
        if sender.send(line).await.is_err() {
            eprintln!("Interchange receiver dropped");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edi_faker::sample_837p_text;
    use std::io::Write;

    #[tokio::test]
    async fn test_stream_skips_junk_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "{}", sample_837p_text()).expect("write");
        writeln!(file, "not an interchange").expect("write");
        writeln!(file, "{}", sample_837p_text()).expect("write");

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        stream_interchanges(file.path().to_str().expect("utf8 path"), tx)
            .await
            .expect("stream");

        let mut received = 0;
        while let Some(line) = rx.recv().await {
            assert!(line.starts_with("ISA"));
            received += 1;
        }
        assert_eq!(received, 2);
    }
}
