//! Result publishing.
//!
//! Detection output is serialized to JSON and published persistently to
//! the results routing key on the main exchange. Publish failures are
//! not retried here; they surface to the handler's failed path and fall
//! under the same retry/dead-letter policy as any other processing
//! error.

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::Channel;
use tracing::{debug, info};

use super::{result_properties, EXCHANGE, OUTBOUND_ROUTING_KEY};
use crate::error::{Result, WorkerError};
use crate::types::AnomalyResult;

/// Sink for detection results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, result: &AnomalyResult) -> Result<()>;
}

/// Publishes results to the main exchange over an AMQP channel.
///
/// The channel should have confirm mode enabled; without it the
/// awaited confirmation always resolves as not requested and a
/// broker-side loss goes unnoticed.
pub struct AmqpResultPublisher {
    channel: Channel,
}

impl AmqpResultPublisher {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ResultSink for AmqpResultPublisher {
    async fn publish(&self, result: &AnomalyResult) -> Result<()> {
        let payload = serde_json::to_vec(result)
            .map_err(|e| WorkerError::Publish(format!("Failed to serialize result: {}", e)))?;

        let confirm = self
            .channel
            .basic_publish(
                EXCHANGE,
                OUTBOUND_ROUTING_KEY,
                BasicPublishOptions::default(),
                &payload,
                result_properties(),
            )
            .await
            .map_err(|e| WorkerError::Publish(format!("Failed to publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| WorkerError::Publish(format!("Publish confirmation failed: {}", e)))?;

        debug!(
            exchange = %EXCHANGE,
            routing_key = %OUTBOUND_ROUTING_KEY,
            "Published result"
        );
        info!(
            company_id = result.company_id,
            anomalies = result.anomalies.len(),
            "Published anomaly result"
        );

        Ok(())
    }
}
