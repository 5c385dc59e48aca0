//! Wire-level data model for the anomaly worker.
//!
//! Inbound events and outbound results are JSON message bodies; ledger
//! records come from the backend's internal transaction endpoint.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Inbound message body: a batch of transaction ids for one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub company_id: i64,
    #[serde(default)]
    pub txn_ids: Vec<i64>,
}

/// A transaction record as returned by the ledger service.
///
/// The backend is not fully trusted here: `amount` is coerced to zero
/// when absent or unparsable, and `date`/`categoryName` default to empty
/// strings. Only `id` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Decimal,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub category_name: String,
}

/// Fixed-shape numeric input for the scoring oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub amount: f64,
    /// Day of week, Monday = 0 through Sunday = 6.
    pub day_of_week: u32,
    pub hour: u32,
    pub category_id: i32,
}

impl FeatureVector {
    /// The vector in the fixed column order the oracle expects.
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.amount,
            f64::from(self.day_of_week),
            f64::from(self.hour),
            f64::from(self.category_id),
        ]
    }
}

/// Outbound message body published to the results routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyResult {
    pub company_id: i64,
    /// The flagged records. May be empty; downstream consumers handle
    /// an empty list the same way as a populated one.
    pub anomalies: Vec<TransactionRecord>,
    /// ISO-8601 UTC timestamp of when detection ran.
    pub detected_at: String,
}

/// Accept a number, a numeric string, or anything else (including an
/// explicit null) as a decimal amount, falling back to zero.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => {
            let repr = n.to_string();
            repr.parse()
                .or_else(|_| Decimal::from_scientific(&repr))
                .unwrap_or(Decimal::ZERO)
        }
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    })
}
