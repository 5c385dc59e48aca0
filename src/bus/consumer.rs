//! Broker connection lifecycle and message dispatch.
//!
//! One connection, one channel, one delivery in flight. On startup and
//! after any failure the loop reconnects with a fixed delay, forever;
//! termination comes only from outside the process. An in-flight
//! delivery interrupted by a disconnect is redelivered by the broker.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    ConfirmSelectOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{error, info};

use super::{publisher::AmqpResultPublisher, retry_properties, topology, INPUT_QUEUE};
use crate::config::AmqpConfig;
use crate::error::{Result, WorkerError};
use crate::handler::{Outcome, Worker};

/// Fixed delay between reconnection attempts. No backoff, no jitter,
/// no attempt cap.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const CONSUMER_TAG: &str = "anomaly-worker";

/// Owns the broker connection and keeps the handler fed.
pub struct ConsumerLoop {
    config: AmqpConfig,
    worker: Arc<Worker>,
}

impl ConsumerLoop {
    pub fn new(config: AmqpConfig, worker: Arc<Worker>) -> Self {
        Self { config, worker }
    }

    /// Run forever: connect, declare topology, consume; on any failure
    /// or stream end, wait the fixed delay and start over.
    pub async fn run(&self) {
        loop {
            info!(host = %self.config.host, "Connecting to broker");
            match self.connect_and_consume().await {
                Ok(()) => info!(
                    delay_secs = RECONNECT_DELAY.as_secs(),
                    "Consumer stream ended, reconnecting"
                ),
                Err(e) => error!(
                    error = %e,
                    delay_secs = RECONNECT_DELAY.as_secs(),
                    "Broker connection lost, reconnecting"
                ),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_and_consume(&self) -> Result<()> {
        let conn = Connection::connect(&self.config.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to create channel: {}", e)))?;

        // Confirm mode, so awaiting a publish surfaces broker-side
        // loss instead of always resolving NotRequested.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to enable confirms: {}", e)))?;

        topology::declare(&channel).await?;

        let mut consumer = channel
            .basic_consume(
                INPUT_QUEUE,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to start consumer: {}", e)))?;

        let publisher = AmqpResultPublisher::new(channel.clone());
        info!(queue = %INPUT_QUEUE, "Consumer ready, waiting for messages");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery
                .map_err(|e| WorkerError::Connection(format!("Delivery error: {}", e)))?;
            self.dispatch(&channel, &publisher, delivery).await?;
        }

        Ok(())
    }

    /// Apply the handler's outcome to the broker. Errors here mean the
    /// channel is unusable; the caller reconnects and the broker
    /// redelivers anything left unacknowledged.
    async fn dispatch(
        &self,
        channel: &Channel,
        publisher: &AmqpResultPublisher,
        delivery: Delivery,
    ) -> Result<()> {
        let retries = super::retry_count(&delivery.properties);
        let outcome = self.worker.process(&delivery.data, retries, publisher).await;

        match outcome {
            Outcome::Ack => delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| WorkerError::Connection(format!("Failed to ack: {}", e))),
            Outcome::Retry(count) => {
                // Republish before acking: if the republish fails the
                // original stays unacked and comes back on reconnect.
                Self::republish(channel, &delivery.data, count).await?;
                info!(retry = count, "Re-queued message for retry");
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(|e| WorkerError::Connection(format!("Failed to ack: {}", e)))
            }
            Outcome::DeadLetter => delivery
                .reject(BasicRejectOptions { requeue: false })
                .await
                .map_err(|e| WorkerError::Connection(format!("Failed to reject: {}", e))),
        }
    }

    /// Republish the original body to the input queue with the
    /// incremented retry counter, via the default exchange.
    async fn republish(channel: &Channel, body: &[u8], count: u32) -> Result<()> {
        let confirm = channel
            .basic_publish(
                "",
                INPUT_QUEUE,
                BasicPublishOptions::default(),
                body,
                retry_properties(count),
            )
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to republish: {}", e)))?;

        confirm
            .await
            .map_err(|e| WorkerError::Connection(format!("Republish confirmation failed: {}", e)))?;

        Ok(())
    }
}

/// Integration tests requiring a running RabbitMQ instance.
///
/// Run with: AMQP_URL=amqp://localhost:5672 cargo test consumer_integration -- --ignored
#[cfg(test)]
mod integration_tests {
    use lapin::{Connection, ConnectionProperties};

    use super::*;
    use crate::bus::retry_count;

    fn amqp_url() -> String {
        std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://localhost:5672".to_string())
    }

    #[tokio::test]
    #[ignore = "Requires RabbitMQ"]
    async fn republish_carries_retry_header() {
        let conn = Connection::connect(&amqp_url(), ConnectionProperties::default())
            .await
            .expect("Failed to connect");
        let channel = conn.create_channel().await.expect("Failed to open channel");
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .expect("Failed to enable confirms");
        topology::declare(&channel).await.expect("Topology failed");

        let body = br#"{"companyId": 7, "txnIds": [1]}"#;
        ConsumerLoop::republish(&channel, body, 2)
            .await
            .expect("Republish failed");

        let message = channel
            .basic_get(INPUT_QUEUE, lapin::options::BasicGetOptions::default())
            .await
            .expect("basic_get failed")
            .expect("Queue was empty");
        let delivery = message.delivery;

        assert_eq!(retry_count(&delivery.properties), 2);
        assert_eq!(delivery.data.as_slice(), body);
        delivery
            .ack(BasicAckOptions::default())
            .await
            .expect("Ack failed");
    }
}
