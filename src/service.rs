use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::claim837::{parse_837, ParsedClaim837};
use crate::error::{EdiError, ParseError};
use crate::logging::log_transaction_event;
use crate::model::{Envelope, TransactionType};
use crate::remit835::{generate_835, RemittanceAdvice};
use crate::tokenizer::tokenize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Parsing,
    Generating,
    Completed,
    Failed,
}

/// History entry, kept per transaction id for the life of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub txn_type: TransactionType,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdiTransactionResult {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub claim: Option<ParsedClaim837>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edi835Result {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub x12: Option<String>,
    pub error: Option<String>,
}

/// Front door for claim submission and remittance generation. Cheap to share:
/// history lives behind an async mutex, identifiers come from atomic counters,
/// so any number of tasks can submit concurrently.
pub struct EdiService {
    history: Arc<Mutex<HashMap<String, TransactionRecord>>>,
    txn_counter: AtomicU64,
    control_counter: AtomicU64,
    sender_id: String,
    receiver_id: String,
    verbose: bool,
}

impl EdiService {
    pub fn new(sender_id: impl Into<String>, receiver_id: impl Into<String>, verbose: bool) -> Self {
        Self {
            history: Arc::new(Mutex::new(HashMap::new())),
            txn_counter: AtomicU64::new(0),
            control_counter: AtomicU64::new(0),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            verbose,
        }
    }

    fn next_transaction_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("TXN-{n:06}")
    }

    fn next_control_number(&self) -> u64 {
        self.control_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn record(&self, transaction_id: &str, txn_type: TransactionType) {
        self.history.lock().await.insert(
            transaction_id.to_string(),
            TransactionRecord {
                transaction_id: transaction_id.to_string(),
                txn_type,
                status: TransactionStatus::Pending,
                created_at: Utc::now(),
                completed_at: None,
                error: None,
            },
        );
    }

    async fn update(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        error: Option<String>,
    ) {
        let mut history = self.history.lock().await;
        if let Some(record) = history.get_mut(transaction_id) {
            record.status = status;
            if matches!(
                status,
                TransactionStatus::Completed | TransactionStatus::Failed
            ) {
                record.completed_at = Some(Utc::now());
            }
            record.error = error;
        }
    }

    /// Parse an inbound 837 interchange. Any parse or validation failure is
    /// captured on the record and the result; nothing panics on bad input.
    pub async fn submit_837(&self, x12: &str) -> EdiTransactionResult {
        let transaction_id = self.next_transaction_id();
        self.record(&transaction_id, TransactionType::Claim837P).await;
        if self.verbose {
            log_transaction_event("edi-service", &transaction_id, "received", "837 submitted");
        }
        self.update(&transaction_id, TransactionStatus::Parsing, None)
            .await;

        let outcome: Result<(TransactionType, ParsedClaim837), EdiError> = tokenize(x12)
            .map_err(EdiError::from)
            .and_then(|envelope| {
                let txn = envelope
                    .transactions()
                    .find(|t| {
                        matches!(
                            t.txn_type,
                            TransactionType::Claim837P | TransactionType::Claim837I
                        )
                    })
                    .ok_or(EdiError::Parse(ParseError::MissingSegment { id: "ST" }))?;
                // Keep the record's type honest for institutional claims.
                let claim = parse_837(txn)?;
                Ok((txn.txn_type, claim))
            });

        match outcome {
            Ok((txn_type, claim)) => {
                {
                    let mut history = self.history.lock().await;
                    if let Some(record) = history.get_mut(&transaction_id) {
                        record.txn_type = txn_type;
                    }
                }
                self.update(&transaction_id, TransactionStatus::Completed, None)
                    .await;
                if self.verbose {
                    log_transaction_event(
                        "edi-service",
                        &transaction_id,
                        "completed",
                        &format!("parsed claim {}", claim.claim_id),
                    );
                }
                EdiTransactionResult {
                    transaction_id,
                    status: TransactionStatus::Completed,
                    claim: Some(claim),
                    error: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.update(
                    &transaction_id,
                    TransactionStatus::Failed,
                    Some(message.clone()),
                )
                .await;
                if self.verbose {
                    log_transaction_event("edi-service", &transaction_id, "failed", &message);
                }
                EdiTransactionResult {
                    transaction_id,
                    status: TransactionStatus::Failed,
                    claim: None,
                    error: Some(message),
                }
            }
        }
    }

    /// Generate an outbound 835 interchange with a fresh control number.
    pub async fn generate_835(&self, remittance: &RemittanceAdvice) -> Edi835Result {
        let transaction_id = self.next_transaction_id();
        self.record(&transaction_id, TransactionType::Remittance835)
            .await;
        self.update(&transaction_id, TransactionStatus::Generating, None)
            .await;

        let control_number = self.next_control_number();
        match generate_835(remittance, control_number as u32) {
            Ok(txn) => {
                let envelope = Envelope::single(
                    self.sender_id.clone(),
                    self.receiver_id.clone(),
                    control_number,
                    Utc::now().naive_utc(),
                    txn,
                );
                let x12 = envelope.serialize();
                self.update(&transaction_id, TransactionStatus::Completed, None)
                    .await;
                if self.verbose {
                    log_transaction_event(
                        "edi-service",
                        &transaction_id,
                        "completed",
                        &format!("835 generated, {} bytes", x12.len()),
                    );
                }
                Edi835Result {
                    transaction_id,
                    status: TransactionStatus::Completed,
                    x12: Some(x12),
                    error: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.update(
                    &transaction_id,
                    TransactionStatus::Failed,
                    Some(message.clone()),
                )
                .await;
                if self.verbose {
                    log_transaction_event("edi-service", &transaction_id, "failed", &message);
                }
                Edi835Result {
                    transaction_id,
                    status: TransactionStatus::Failed,
                    x12: None,
                    error: Some(message),
                }
            }
        }
    }

    pub async fn transaction_status(&self, transaction_id: &str) -> Option<TransactionRecord> {
        self.history.lock().await.get(transaction_id).cloned()
    }

    pub async fn history(&self) -> Vec<TransactionRecord> {
        let mut records: Vec<TransactionRecord> =
            self.history.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        records
    }
}
