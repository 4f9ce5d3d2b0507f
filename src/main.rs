use clap::Parser;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use edix12::claim837::ParsedClaim837;
use edix12::config::{Cli, Command};
use edix12::edi_faker::write_fake_interchanges;
use edix12::reader::stream_interchanges;
use edix12::remit835::{
    create_remittance_from_adjudication, AdjudicationDecision, AdjudicationResult, PayeeInfo,
    PayerInfo, PersonName, ServiceDecision,
};
use edix12::reporter;
use edix12::service::{EdiService, TransactionStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let service = EdiService::new(cli.sender.clone(), cli.receiver.clone(), cli.verbose);

    match cli.command {
        Command::Fake { file, count } => {
            write_fake_interchanges(&file, count)?;
            println!("Wrote {count} interchanges to {file}");
        }
        Command::Parse { file } => {
            run_parse(&service, &file).await?;
        }
        Command::Remit { file, rate } => {
            run_remit(&service, &file, rate).await?;
        }
    }
    Ok(())
}

async fn run_parse(service: &EdiService, file: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let path = file.to_string();
    let feeder = tokio::spawn(async move { stream_interchanges(&path, tx).await });

    while let Some(x12) = rx.recv().await {
        let result = service.submit_837(&x12).await;
        match result.claim {
            Some(claim) => reporter::print_claim_summary(&claim),
            None => eprintln!(
                "{}: {}",
                result.transaction_id,
                result.error.unwrap_or_default()
            ),
        }
    }
    feeder.await??;

    reporter::print_transaction_log(&service.history().await);
    Ok(())
}

async fn run_remit(service: &EdiService, file: &str, rate: f64) -> anyhow::Result<()> {
    let allowed_rate = Decimal::try_from(rate)?;
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let path = file.to_string();
    let feeder = tokio::spawn(async move { stream_interchanges(&path, tx).await });

    while let Some(x12) = rx.recv().await {
        let submitted = service.submit_837(&x12).await;
        let Some(claim) = submitted.claim else {
            eprintln!(
                "{}: {}",
                submitted.transaction_id,
                submitted.error.unwrap_or_default()
            );
            continue;
        };

        let adjudication = flat_rate_adjudication(&claim, allowed_rate);
        let remittance =
            create_remittance_from_adjudication(&adjudication, &submitted.transaction_id);
        let result = service.generate_835(&remittance).await;
        match result.status {
            TransactionStatus::Completed => {
                println!("{}", result.x12.unwrap_or_default());
            }
            _ => eprintln!(
                "{}: {}",
                result.transaction_id,
                result.error.unwrap_or_default()
            ),
        }
    }
    feeder.await??;

    reporter::print_transaction_log(&service.history().await);
    Ok(())
}

/// Demo payer: allow a flat fraction of every charge, write off the rest.
fn flat_rate_adjudication(claim: &ParsedClaim837, rate: Decimal) -> AdjudicationResult {
    let services = claim
        .service_lines
        .iter()
        .map(|line| ServiceDecision {
            procedure_code: line.procedure_code.clone(),
            charged: line.charge_amount,
            paid: (line.charge_amount * rate).round_dp(2),
            patient_responsibility: Decimal::ZERO,
            reason_code: None,
            units: line.units.to_u32().unwrap_or(1),
        })
        .collect();

    AdjudicationResult {
        claim_id: claim.claim_id.clone(),
        decision: AdjudicationDecision::PartiallyApproved,
        payer: PayerInfo {
            name: claim
                .subscriber
                .payer_name
                .clone()
                .unwrap_or_else(|| "UNKNOWN PAYER".to_string()),
            id: "00000".to_string(),
        },
        payee: PayeeInfo {
            name: claim.provider.name.clone(),
            npi: claim.provider.npi.clone(),
            tax_id: None,
        },
        patient: Some(PersonName {
            last_name: claim.subscriber.last_name.clone(),
            first_name: claim.subscriber.first_name.clone(),
        }),
        adjudicated_on: chrono::Utc::now().date_naive(),
        services,
    }
}
