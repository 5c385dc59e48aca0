//! AMQP broker layer: topology, consumption, and result publishing.
//!
//! Naming is shared with the rest of the finance platform: inbound
//! transaction-batch events and outbound anomaly results both flow
//! through the main topic exchange, and exhausted deliveries land on
//! the dead-letter queue via the declared dead-letter exchange.

use std::collections::BTreeMap;

use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;

pub mod consumer;
pub mod publisher;
pub mod topology;

pub use consumer::ConsumerLoop;
pub use publisher::{AmqpResultPublisher, ResultSink};

/// Main topic exchange for inbound events and outbound results.
pub const EXCHANGE: &str = "finance.exchange";
/// Dead-letter exchange for exhausted deliveries.
pub const DEAD_LETTER_EXCHANGE: &str = "finance.dlx";
/// Queue this worker consumes transaction-batch events from.
pub const INPUT_QUEUE: &str = "ai.anomaly.queue";
/// Queue downstream consumers read detection results from.
pub const RESULT_QUEUE: &str = "ai.anomaly.results";
/// Quarantine queue for poison messages.
pub const DEAD_LETTER_QUEUE: &str = "ai.anomaly.dlq";
/// Routing key for inbound transaction-batch events.
pub const INBOUND_ROUTING_KEY: &str = "transactions.new";
/// Routing key for outbound anomaly results.
pub const OUTBOUND_ROUTING_KEY: &str = "anomalies.detected";

/// Header carrying the retry counter across redeliveries. It travels
/// with the message, never in process memory: a redelivered message may
/// land on a different worker than the one that first failed it.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Persistent delivery mode.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Read the retry counter from delivery properties, defaulting to 0
/// when headers are absent entirely or carry an unexpected type.
pub fn retry_count(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers() else {
        return 0;
    };

    match headers.inner().get(RETRY_COUNT_HEADER) {
        Some(AMQPValue::LongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::LongLongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortInt(v)) => i32::from(*v).max(0) as u32,
        Some(AMQPValue::ShortShortInt(v)) => i32::from(*v).max(0) as u32,
        Some(AMQPValue::LongUInt(v)) => *v,
        Some(AMQPValue::ShortUInt(v)) => u32::from(*v),
        Some(AMQPValue::ShortShortUInt(v)) => u32::from(*v),
        _ => 0,
    }
}

/// Properties for a retried republish: persistent, with the incremented
/// counter in the retry header.
pub fn retry_properties(count: u32) -> BasicProperties {
    let mut headers = BTreeMap::new();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongInt(count.min(i32::MAX as u32) as i32),
    );

    BasicProperties::default()
        .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
        .with_headers(FieldTable::from(headers))
}

/// Properties for a published result: persistent JSON.
pub fn result_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_headers_default_to_zero() {
        assert_eq!(retry_count(&BasicProperties::default()), 0);
        assert_eq!(retry_count(&BasicProperties::default().with_headers(FieldTable::default())), 0);
    }

    #[test]
    fn retry_properties_round_trip() {
        for count in [0, 1, 2, 3] {
            let properties = retry_properties(count);
            assert_eq!(retry_count(&properties), count);
        }
    }

    #[test]
    fn retry_properties_are_persistent() {
        let properties = retry_properties(1);
        assert_eq!(properties.delivery_mode(), &Some(DELIVERY_MODE_PERSISTENT));
    }

    #[test]
    fn foreign_header_types_default_to_zero() {
        let mut headers = BTreeMap::new();
        headers.insert(
            RETRY_COUNT_HEADER.into(),
            AMQPValue::LongString("2".into()),
        );
        let properties = BasicProperties::default().with_headers(FieldTable::from(headers));
        assert_eq!(retry_count(&properties), 0);
    }

    #[test]
    fn alternate_integer_encodings_are_read() {
        for value in [
            AMQPValue::LongLongInt(2),
            AMQPValue::ShortInt(2),
            AMQPValue::LongUInt(2),
            AMQPValue::ShortShortUInt(2),
        ] {
            let mut headers = BTreeMap::new();
            headers.insert(RETRY_COUNT_HEADER.into(), value);
            let properties = BasicProperties::default().with_headers(FieldTable::from(headers));
            assert_eq!(retry_count(&properties), 2);
        }
    }

    #[test]
    fn negative_counter_clamps_to_zero() {
        let mut headers = BTreeMap::new();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(-5));
        let properties = BasicProperties::default().with_headers(FieldTable::from(headers));
        assert_eq!(retry_count(&properties), 0);
    }

    #[test]
    fn result_properties_are_persistent_json() {
        let properties = result_properties();
        assert_eq!(properties.delivery_mode(), &Some(DELIVERY_MODE_PERSISTENT));
        assert_eq!(
            properties.content_type().as_ref().map(|c| c.as_str()),
            Some("application/json")
        );
    }
}
