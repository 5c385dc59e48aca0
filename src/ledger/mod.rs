//! Ledger service client and feature mapping.
//!
//! Fetches transaction records from the backend's internal endpoint and
//! maps them into the fixed feature shape the scoring oracle consumes.
//! The client never raises outward: timeouts, network errors, and
//! non-success responses all degrade to an empty record set, which the
//! handler treats as a skip.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use tracing::{error, warn};

use crate::categories::CategoryRegistry;
use crate::config::BackendConfig;
use crate::error::{Result, WorkerError};
use crate::types::{FeatureVector, TransactionRecord};

/// Placeholder hour used when records carry no time component.
pub const PLACEHOLDER_HOUR: u32 = 12;

/// Source of transaction records for a set of ids.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the records for `txn_ids`. Infallible by contract: any
    /// failure produces an empty result.
    async fn fetch(&self, company_id: i64, txn_ids: &[i64]) -> Vec<TransactionRecord>;
}

/// HTTP client for the ledger backend.
pub struct LedgerClient {
    base_url: String,
    client: reqwest::Client,
}

impl LedgerClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WorkerError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl RecordSource for LedgerClient {
    async fn fetch(&self, company_id: i64, txn_ids: &[i64]) -> Vec<TransactionRecord> {
        let url = format!("{}/internal/transactions", self.base_url);
        let body = json!({ "companyId": company_id, "ids": txn_ids });

        let response = match self
            .client
            .post(&url)
            .header("X-Internal-Call", "true")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(company_id, error = %e, "Failed to fetch transactions");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                company_id,
                status = %response.status(),
                "Backend returned non-success for transaction fetch"
            );
            return Vec::new();
        }

        match response.json::<Vec<TransactionRecord>>().await {
            Ok(records) => records,
            Err(e) => {
                error!(company_id, error = %e, "Failed to decode transaction records");
                Vec::new()
            }
        }
    }
}

/// Day of week for a `YYYY-MM-DD` date string, Monday = 0. A malformed
/// date yields 0 rather than failing.
pub fn day_of_week(date: &str) -> u32 {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| d.weekday().num_days_from_monday())
        .unwrap_or(0)
}

/// Map a record into the oracle's feature shape.
pub fn to_feature(record: &TransactionRecord, registry: &CategoryRegistry) -> FeatureVector {
    FeatureVector {
        amount: record.amount.abs().to_f64().unwrap_or(0.0),
        day_of_week: day_of_week(&record.date),
        hour: PLACEHOLDER_HOUR,
        category_id: registry.resolve(&record.category_name),
    }
}

/// Map records in order; the oracle sees exactly one vector per record.
pub fn to_features(
    records: &[TransactionRecord],
    registry: &CategoryRegistry,
) -> Vec<FeatureVector> {
    records
        .iter()
        .map(|record| to_feature(record, registry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::EMPTY_CATEGORY_ID;

    fn record(id: i64, amount: &str, date: &str, category: &str) -> TransactionRecord {
        TransactionRecord {
            id,
            amount: amount.parse().unwrap(),
            date: date.to_string(),
            category_name: category.to_string(),
        }
    }

    #[test]
    fn monday_is_zero() {
        // 2024-03-04 was a Monday, 2024-03-10 a Sunday.
        assert_eq!(day_of_week("2024-03-04"), 0);
        assert_eq!(day_of_week("2024-03-10"), 6);
    }

    #[test]
    fn malformed_date_is_zero() {
        for date in ["", "not-a-date", "2024-13-40", "03/04/2024"] {
            assert_eq!(day_of_week(date), 0, "date: {}", date);
        }
    }

    #[test]
    fn feature_uses_absolute_amount_and_placeholder_hour() {
        let registry = CategoryRegistry::in_memory();
        let feature = to_feature(&record(1, "-250.00", "2024-03-05", "Travel"), &registry);

        assert_eq!(feature.amount, 250.0);
        assert_eq!(feature.day_of_week, 1);
        assert_eq!(feature.hour, PLACEHOLDER_HOUR);
        assert_eq!(feature.category_id, 0);
    }

    #[test]
    fn empty_category_maps_to_sentinel() {
        let registry = CategoryRegistry::in_memory();
        let feature = to_feature(&record(1, "10", "2024-03-05", ""), &registry);
        assert_eq!(feature.category_id, EMPTY_CATEGORY_ID);
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_empty() {
        let client = LedgerClient::new(&BackendConfig {
            // Port 9 (discard) is not listening locally.
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
        })
        .unwrap();

        let records = client.fetch(7, &[1, 2, 3]).await;
        assert!(records.is_empty());
    }

    #[test]
    fn features_preserve_record_order() {
        let registry = CategoryRegistry::in_memory();
        let records = vec![
            record(1, "10", "2024-03-04", "a"),
            record(2, "20", "2024-03-05", "b"),
            record(3, "30", "2024-03-06", "a"),
        ];

        let features = to_features(&records, &registry);
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].amount, 10.0);
        assert_eq!(features[1].amount, 20.0);
        assert_eq!(features[2].amount, 30.0);
        // Repeated category resolves to the same id.
        assert_eq!(features[0].category_id, features[2].category_id);
    }
}
