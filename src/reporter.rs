use colored::Colorize;
use prettytable::{row, Table};

use crate::claim837::ParsedClaim837;
use crate::service::{TransactionRecord, TransactionStatus};

/// One-claim summary table: header facts plus a row per service line.
pub fn print_claim_summary(claim: &ParsedClaim837) {
    println!(
        "\n{} {} ({}, billed {})",
        "Claim".bold(),
        claim.claim_id.bold(),
        claim.txn_type,
        claim.total_charge
    );
    println!(
        "  Provider: {} (NPI {})",
        claim.provider.name, claim.provider.npi
    );
    println!(
        "  Subscriber: {} {}{}",
        claim.subscriber.first_name,
        claim.subscriber.last_name,
        claim
            .subscriber
            .payer_name
            .as_deref()
            .map(|p| format!(", payer {p}"))
            .unwrap_or_default()
    );
    if !claim.diagnoses.is_empty() {
        let codes: Vec<&str> = claim.diagnoses.iter().map(|d| d.code.as_str()).collect();
        println!("  Diagnoses: {}", codes.join(", "));
    }

    let mut table = Table::new();
    table.add_row(row!["Line", "Procedure", "Charge", "Units", "Date"]);
    for line in &claim.service_lines {
        table.add_row(row![
            line.line_number,
            line.procedure_code,
            line.charge_amount,
            line.units,
            line.service_date
                .map(|d| d.to_string())
                .unwrap_or_default(),
        ]);
    }
    table.printstd();
}

/// Transaction log table with colored status column.
pub fn print_transaction_log(records: &[TransactionRecord]) {
    let mut table = Table::new();
    table.add_row(row!["Transaction", "Type", "Status", "Error"]);
    for record in records {
        let status = match record.status {
            TransactionStatus::Completed => "Completed".green(),
            TransactionStatus::Failed => "Failed".red(),
            TransactionStatus::Pending => "Pending".yellow(),
            TransactionStatus::Parsing => "Parsing".yellow(),
            TransactionStatus::Generating => "Generating".yellow(),
        };
        table.add_row(row![
            record.transaction_id,
            record.txn_type,
            status,
            record.error.as_deref().unwrap_or(""),
        ]);
    }
    table.printstd();
}
