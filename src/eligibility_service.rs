use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::eligibility::{generate_270, parse_271, EligibilityInquiry, EligibilityResponse};
use crate::error::EdiError;
use crate::logging::log_transaction_event;
use crate::model::{Envelope, TransactionType};
use crate::tokenizer::tokenize;

/// How an inquiry reaches the payer. The transport returns raw 271 text; the
/// service owns envelope construction, timeouts and interpretation.
pub trait EligibilityTransport: Send + Sync + 'static {
    fn send_inquiry(&self, x12: String) -> BoxFuture<'static, anyhow::Result<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EligibilityCheckStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityCheckResult {
    pub request_id: String,
    pub status: EligibilityCheckStatus,
    pub response: Option<EligibilityResponse>,
    pub error: Option<String>,
    pub from_cache: bool,
    pub checked_at: DateTime<Utc>,
}

struct CacheEntry {
    result: EligibilityCheckResult,
    stored_at: Instant,
}

type SharedCheck = Shared<BoxFuture<'static, EligibilityCheckResult>>;

/// Eligibility front door: builds 270s, sends them through a transport,
/// interprets 271s. Completed answers are cached for a TTL, and concurrent
/// checks for the same member coalesce onto one in-flight request so a burst
/// costs the payer a single inquiry.
pub struct EligibilityService<T: EligibilityTransport> {
    transport: Arc<T>,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    in_flight: Arc<Mutex<HashMap<String, SharedCheck>>>,
    history: Arc<Mutex<HashMap<String, EligibilityCheckResult>>>,
    request_counter: Arc<AtomicU64>,
    control_counter: Arc<AtomicU64>,
    ttl: Duration,
    timeout: Duration,
    sender_id: String,
    receiver_id: String,
    verbose: bool,
}

impl<T: EligibilityTransport> Clone for EligibilityService<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            in_flight: Arc::clone(&self.in_flight),
            history: Arc::clone(&self.history),
            request_counter: Arc::clone(&self.request_counter),
            control_counter: Arc::clone(&self.control_counter),
            ttl: self.ttl,
            timeout: self.timeout,
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            verbose: self.verbose,
        }
    }
}

impl<T: EligibilityTransport> EligibilityService<T> {
    pub fn new(
        transport: T,
        ttl: Duration,
        timeout: Duration,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        verbose: bool,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            cache: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(HashMap::new())),
            request_counter: Arc::new(AtomicU64::new(0)),
            control_counter: Arc::new(AtomicU64::new(0)),
            ttl,
            timeout,
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            verbose,
        }
    }

    /// Check coverage for one inquiry. Fresh cached answers come back with
    /// `from_cache` set and no wire traffic; otherwise callers for the same
    /// member share a single in-flight request.
    pub async fn check_eligibility(&self, inquiry: &EligibilityInquiry) -> EligibilityCheckResult {
        let key = cache_key(inquiry);

        {
            let mut cache = self.cache.lock().await;
            match cache.get(&key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    let mut result = entry.result.clone();
                    result.from_cache = true;
                    if self.verbose {
                        log_transaction_event(
                            "eligibility-service",
                            &result.request_id,
                            "cache-hit",
                            &key,
                        );
                    }
                    return result;
                }
                Some(_) => {
                    cache.remove(&key);
                }
                None => {}
            }
        }

        let shared = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(&key) {
                existing.clone()
            } else {
                let service = self.clone();
                let inquiry = inquiry.clone();
                let check_key = key.clone();
                let shared: SharedCheck = async move {
                    service.perform_check(&inquiry, &check_key).await
                }
                .boxed()
                .shared();
                in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        shared.await
    }

    async fn perform_check(&self, inquiry: &EligibilityInquiry, key: &str) -> EligibilityCheckResult {
        let request_id = {
            let n = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
            format!("ELG-{n:06}")
        };
        if self.verbose {
            log_transaction_event("eligibility-service", &request_id, "sending", key);
        }

        let result = match self.run_inquiry(inquiry, &request_id).await {
            Ok(response) => EligibilityCheckResult {
                request_id: request_id.clone(),
                status: EligibilityCheckStatus::Completed,
                response: Some(response),
                error: None,
                from_cache: false,
                checked_at: Utc::now(),
            },
            Err(message) => EligibilityCheckResult {
                request_id: request_id.clone(),
                status: EligibilityCheckStatus::Failed,
                response: None,
                error: Some(message),
                from_cache: false,
                checked_at: Utc::now(),
            },
        };

        if result.status == EligibilityCheckStatus::Completed {
            self.cache.lock().await.insert(
                key.to_string(),
                CacheEntry {
                    result: result.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        self.history
            .lock()
            .await
            .insert(request_id.clone(), result.clone());
        self.in_flight.lock().await.remove(key);

        if self.verbose {
            let event = match result.status {
                EligibilityCheckStatus::Completed => "completed",
                _ => "failed",
            };
            log_transaction_event("eligibility-service", &request_id, event, key);
        }
        result
    }

    async fn run_inquiry(
        &self,
        inquiry: &EligibilityInquiry,
        request_id: &str,
    ) -> Result<EligibilityResponse, String> {
        let control_number = self.control_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let txn = generate_270(inquiry, control_number as u32, request_id)
            .map_err(|e| e.to_string())?;
        let envelope = Envelope::single(
            self.sender_id.clone(),
            self.receiver_id.clone(),
            control_number,
            Utc::now().naive_utc(),
            txn,
        );
        let x12 = envelope.serialize();

        let raw = match tokio::time::timeout(self.timeout, self.transport.send_inquiry(x12)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => return Err(format!("transport error: {err}")),
            Err(_) => return Err(format!("payer did not answer within {:?}", self.timeout)),
        };

        let response_envelope = tokenize(&raw).map_err(|e| EdiError::from(e).to_string())?;
        let txn = response_envelope
            .find_transaction(TransactionType::EligibilityResponse271)
            .ok_or_else(|| "response interchange carries no 271".to_string())?;
        parse_271(txn).map_err(|e| e.to_string())
    }

    pub async fn request_status(&self, request_id: &str) -> Option<EligibilityCheckResult> {
        self.history.lock().await.get(request_id).cloned()
    }
}

/// Identity of an eligibility question: who is asked about, at which payer,
/// for which services. Service codes are sorted so ordering never splits the
/// cache.
fn cache_key(inquiry: &EligibilityInquiry) -> String {
    let subscriber = match &inquiry.subscriber.member_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!(
            "{}|{}|{}",
            inquiry.subscriber.last_name,
            inquiry.subscriber.first_name,
            inquiry
                .subscriber
                .dob
                .map(|d| d.format("%Y%m%d").to_string())
                .unwrap_or_default()
        ),
    };
    let dependent = inquiry
        .dependent
        .as_ref()
        .map(|d| format!("{}|{}", d.last_name, d.first_name))
        .unwrap_or_default();
    let mut codes = inquiry.service_type_codes.clone();
    codes.sort();
    format!(
        "{subscriber}@{payer}#{dependent}#{codes}",
        payer = inquiry.payer.id,
        codes = codes.join(",")
    )
}
