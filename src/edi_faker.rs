use std::fs::File;
use std::io::{BufWriter, Write};

use chrono::{NaiveDate, NaiveDateTime};
use fake::faker::company::en::CompanyName;
use fake::faker::name::en::{FirstName, LastName};
use fake::faker::number::en::NumberWithFormat;
use fake::Fake;
use rand::seq::IndexedRandom;
use rand::Rng;
use rust_decimal::Decimal;

use crate::model::{Envelope, Loop, Segment, Transaction, TransactionType};
use crate::validate::npi_check_digit;

/// Deterministic single-claim 837P interchange, used as the canonical parse
/// fixture. One provider, one subscriber, one diagnosis, one service line.
pub fn sample_837p_text() -> String {
    [
        "ISA*00*          *00*          *ZZ*CLINIC         *ZZ*PAYER          \
*240315*1430*^*00501*000000001*0*P*:~",
        "GS*HC*CLINIC*PAYER*20240315*1430*1*X*005010X222A1~",
        "ST*837*0001*005010X222A1~",
        "BHT*0019*00*REF001*20240315*1430*CH~",
        "HL*1**20*1~",
        "NM1*85*2*GOOD HEALTH CLINIC*****XX*1234567893~",
        "N3*123 MAIN ST~",
        "N4*SPRINGFIELD*IL*62701~",
        "HL*2*1*22*0~",
        "SBR*P*18*******CI~",
        "NM1*IL*1*DOE*JOHN****MI*MEM001~",
        "DMG*D8*19800102*M~",
        "NM1*PR*2*ACME HEALTH*****PI*66666~",
        "CLM*CLM001*125.50***11:B:1~",
        "HI*BK:250.00~",
        "LX*1~",
        "SV1*HC:99213*125.50*UN*1***1~",
        "DTP*472*D8*20240310~",
        "SE*17*0001~",
        "GE*1*1~",
        "IEA*1*000000001~",
    ]
    .concat()
}

const PROCEDURE_CODES: [&str; 5] = ["99213", "99214", "85025", "80053", "71046"];
const DIAGNOSIS_CODES: [&str; 5] = ["E11.9", "I10", "J06.9", "M54.5", "Z00.00"];

fn fake_npi() -> String {
    let first_nine: String = NumberWithFormat("1########").fake();
    let check = npi_check_digit(&first_nine).unwrap_or(0);
    format!("{first_nine}{check}")
}

/// Generate a random but structurally valid 837P claim: real Luhn NPIs,
/// cent-precise charges, diagnosis pointers that stay in range. Output is
/// guaranteed to survive a parse round trip.
pub fn fake_837_interchange(control_number: u64) -> String {
    let mut rng = rand::rng();

    let provider_name: String = CompanyName().fake::<String>().to_uppercase();
    let provider_npi = fake_npi();
    let last_name: String = LastName().fake::<String>().to_uppercase();
    let first_name: String = FirstName().fake::<String>().to_uppercase();
    let member_id: String = NumberWithFormat("MEM######").fake();
    let claim_id: String = NumberWithFormat("CLM######").fake();
    let payer_name = ["ACME HEALTH", "MEDICARE", "BLUE SUMMIT"]
        .choose(&mut rng)
        .map(|s| s.to_string())
        .unwrap_or_default();
    let dob = NaiveDate::from_ymd_opt(
        rng.random_range(1950..=2005),
        rng.random_range(1..=12),
        rng.random_range(1..=28),
    )
    .unwrap_or_default();
    let service_date = NaiveDate::from_ymd_opt(2024, rng.random_range(1..=12), rng.random_range(1..=28))
        .unwrap_or_default();

    let diagnosis = DIAGNOSIS_CODES.choose(&mut rng).copied().unwrap_or("I10");

    let line_count = rng.random_range(1..=3usize);
    let mut lines = Vec::with_capacity(line_count);
    let mut total = Decimal::ZERO;
    for n in 1..=line_count {
        let code = PROCEDURE_CODES.choose(&mut rng).copied().unwrap_or("99213");
        let charge = Decimal::new(rng.random_range(2500..=50000), 2);
        total += charge;
        lines.push((n, code.to_string(), charge));
    }

    let mut txn = Transaction::new(TransactionType::Claim837P, "0001");
    txn.push_segment(
        Segment::new("BHT")
            .with("0019")
            .with("00")
            .with(claim_id.clone())
            .with(service_date.format("%Y%m%d").to_string())
            .with("1200")
            .with("CH"),
    );

    let mut provider = Loop::new("HL");
    provider.push_segment(Segment::new("HL").with("1").with("").with("20").with("1"));
    provider.push_segment(
        Segment::new("NM1")
            .with("85")
            .with("2")
            .with(provider_name)
            .with("")
            .with("")
            .with("")
            .with("")
            .with("XX")
            .with(provider_npi),
    );

    let mut subscriber = Loop::new("HL");
    subscriber.push_segment(Segment::new("HL").with("2").with("1").with("22").with("0"));
    subscriber.push_segment(Segment::new("SBR").with("P").with("18"));
    subscriber.push_segment(
        Segment::new("NM1")
            .with("IL")
            .with("1")
            .with(last_name)
            .with(first_name)
            .with("")
            .with("")
            .with("")
            .with("MI")
            .with(member_id),
    );
    subscriber.push_segment(
        Segment::new("DMG")
            .with("D8")
            .with(dob.format("%Y%m%d").to_string())
            .with(["M", "F"].choose(&mut rng).copied().unwrap_or("M")),
    );
    subscriber.push_segment(
        Segment::new("NM1")
            .with("PR")
            .with("2")
            .with(payer_name),
    );

    let mut claim = Loop::new("CLM");
    claim.push_segment(
        Segment::new("CLM")
            .with(claim_id)
            .with(total.to_string())
            .with("")
            .with("")
            .with_composite(&["11", "B", "1"]),
    );
    claim.push_segment(Segment::new("HI").with_composite(&["ABK", diagnosis]));
    for (n, code, charge) in &lines {
        let mut lx = Loop::new("LX");
        lx.push_segment(Segment::new("LX").with(n.to_string()));
        lx.push_segment(
            Segment::new("SV1")
                .with_composite(&["HC", code])
                .with(charge.to_string())
                .with("UN")
                .with("1")
                .with("")
                .with("")
                .with("1"),
        );
        lx.push_segment(
            Segment::new("DTP")
                .with("472")
                .with("D8")
                .with(service_date.format("%Y%m%d").to_string()),
        );
        claim.push_loop(lx);
    }
    subscriber.push_loop(claim);
    provider.push_loop(subscriber);
    txn.push_loop(provider);

    let stamp = NaiveDateTime::new(
        service_date,
        chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
    );
    Envelope::single("CLINIC", "PAYER", control_number, stamp, txn).serialize()
}

/// Write n fake interchanges, one per line, for feeding the parse pipeline.
pub fn write_fake_interchanges(path: &str, n: usize) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for i in 0..n {
        writeln!(writer, "{}", fake_837_interchange(i as u64 + 1))?;
    }
    Ok(())
}
