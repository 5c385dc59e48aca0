//! Broker topology declaration.
//!
//! Declarations are idempotent and re-run on every (re)connect: the
//! dead-letter path first, then the main exchange, the input queue
//! (with its dead-letter arguments), and the results queue. Finally the
//! channel prefetch is set to a single unacknowledged delivery, which
//! is the worker's whole backpressure mechanism — the broker will not
//! hand over a second message until the first is settled.

use lapin::options::{BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use super::{
    DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE, EXCHANGE, INBOUND_ROUTING_KEY, INPUT_QUEUE,
    OUTBOUND_ROUTING_KEY, RESULT_QUEUE,
};
use crate::error::{Result, WorkerError};

/// In-flight delivery bound per consumer.
pub const PREFETCH_COUNT: u16 = 1;

/// Declare all exchanges, queues, and bindings, and set the prefetch.
pub async fn declare(channel: &Channel) -> Result<()> {
    let durable = ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    };

    // Dead-letter path: direct exchange, quarantine queue bound to the
    // input queue's own name as routing key.
    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Direct,
            durable,
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to declare DLX: {}", e)))?;

    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to declare DLQ: {}", e)))?;

    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_EXCHANGE,
            INPUT_QUEUE,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to bind DLQ: {}", e)))?;

    // Main topic exchange, shared by inbound events and outbound results.
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Topic,
            durable,
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to declare exchange: {}", e)))?;

    // Input queue: rejected deliveries route to the DLX.
    let mut input_args = FieldTable::default();
    input_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
    );
    input_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(INPUT_QUEUE.into()),
    );

    channel
        .queue_declare(
            INPUT_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            input_args,
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to declare input queue: {}", e)))?;

    channel
        .queue_bind(
            INPUT_QUEUE,
            EXCHANGE,
            INBOUND_ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to bind input queue: {}", e)))?;

    // Results queue.
    channel
        .queue_declare(
            RESULT_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to declare result queue: {}", e)))?;

    channel
        .queue_bind(
            RESULT_QUEUE,
            EXCHANGE,
            OUTBOUND_ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to bind result queue: {}", e)))?;

    channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
        .await
        .map_err(|e| WorkerError::Topology(format!("Failed to set prefetch: {}", e)))?;

    info!(
        exchange = %EXCHANGE,
        input_queue = %INPUT_QUEUE,
        dead_letter_queue = %DEAD_LETTER_QUEUE,
        prefetch = PREFETCH_COUNT,
        "Declared broker topology"
    );

    Ok(())
}
