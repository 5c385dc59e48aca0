//! Anomaly-detection ingestion worker.
//!
//! Consumes transaction-batch events from RabbitMQ, fetches the
//! underlying records from the ledger backend, scores them through the
//! anomaly model, and republishes results — under at-least-once
//! delivery with a single in-flight message, counter-based retries,
//! dead-lettering, and automatic reconnection.

pub mod bus;
pub mod categories;
pub mod config;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod scoring;
pub mod types;
