//! Message handling: parse, fetch, score, publish.
//!
//! The handler is broker-free: it consumes a raw body plus the retry
//! counter read from delivery metadata and returns an [`Outcome`] the
//! consumer loop applies to the broker. This keeps the whole state
//! machine — including the retry/dead-letter decision — testable
//! without a connection.
//!
//! Retry and dead-lettering each use exactly one mechanism. A retried
//! delivery is republished with an incremented counter and the original
//! delivery is acked, so the dead-letter binding plays no part in
//! retries. An exhausted delivery is rejected without requeue and
//! reaches the quarantine queue solely through the declared binding.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::bus::ResultSink;
use crate::categories::CategoryRegistry;
use crate::error::WorkerError;
use crate::ledger::{self, RecordSource};
use crate::scoring::Scorer;
use crate::types::{AnomalyResult, TransactionEvent};

/// Maximum retry attempts before a delivery is dead-lettered.
pub const MAX_RETRIES: u32 = 3;

/// What the consumer loop should do with the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Acknowledge: success, intentional skip, or malformed drop.
    Ack,
    /// Republish the original body with this retry counter, then ack.
    Retry(u32),
    /// Reject without requeue; the dead-letter binding routes it.
    DeadLetter,
}

/// The per-delivery processing pipeline.
pub struct Worker {
    source: Arc<dyn RecordSource>,
    scorer: Arc<dyn Scorer>,
    registry: Arc<CategoryRegistry>,
    max_retries: u32,
}

impl Worker {
    pub fn new(
        source: Arc<dyn RecordSource>,
        scorer: Arc<dyn Scorer>,
        registry: Arc<CategoryRegistry>,
    ) -> Self {
        Self {
            source,
            scorer,
            registry,
            max_retries: MAX_RETRIES,
        }
    }

    /// Process one delivery body. `retry_count` is the counter carried
    /// in the delivery metadata, 0 when absent.
    pub async fn process(&self, body: &[u8], retry_count: u32, sink: &dyn ResultSink) -> Outcome {
        let event: TransactionEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed event");
                return Outcome::Ack;
            }
        };

        info!(
            company_id = event.company_id,
            txns = event.txn_ids.len(),
            retries = retry_count,
            "Processing event"
        );

        if event.txn_ids.is_empty() {
            return Outcome::Ack;
        }

        let records = self.source.fetch(event.company_id, &event.txn_ids).await;
        if records.is_empty() {
            warn!(
                company_id = event.company_id,
                "No transactions fetched, skipping"
            );
            return Outcome::Ack;
        }

        let features = ledger::to_features(&records, &self.registry);
        let flagged = self.scorer.score(&features);

        let result = AnomalyResult {
            company_id: event.company_id,
            anomalies: flagged.iter().filter_map(|&i| records.get(i).cloned()).collect(),
            detected_at: Utc::now().to_rfc3339(),
        };

        match sink.publish(&result).await {
            Ok(()) => Outcome::Ack,
            Err(e) => self.fail(event.company_id, retry_count, &e),
        }
    }

    fn fail(&self, company_id: i64, retry_count: u32, err: &WorkerError) -> Outcome {
        error!(
            company_id,
            retry = retry_count,
            max_retries = self.max_retries,
            error = %err,
            "Processing failed"
        );

        if retry_count < self.max_retries {
            Outcome::Retry(retry_count + 1)
        } else {
            error!(company_id, "Max retries exceeded, dead-lettering");
            Outcome::DeadLetter
        }
    }
}
