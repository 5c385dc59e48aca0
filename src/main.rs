//! anomaly-worker: transaction anomaly-detection worker.
//!
//! ## Architecture
//! ```text
//! [finance.exchange] --transactions.new--> [ai.anomaly.queue]
//!                                                |
//!                                                v
//!                                        [anomaly-worker] --> ledger fetch
//!                                                |            model scoring
//!                                                v
//! [finance.exchange] <--anomalies.detected-- results
//!          |
//!          v
//! [ai.anomaly.results]
//! ```
//!
//! ## Configuration
//! - BACKEND_URL: ledger service base URL (e.g., "http://localhost:8080")
//! - RABBITMQ_HOST / RABBITMQ_USER / RABBITMQ_PASS: broker connection
//! - ANOMALY_LOG: tracing filter (default: "info")
//! - ANOMALY_CONFIG: optional YAML configuration file

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anomaly_worker::bus::ConsumerLoop;
use anomaly_worker::categories::CategoryRegistry;
use anomaly_worker::config::{Config, LOG_ENV_VAR};
use anomaly_worker::handler::Worker;
use anomaly_worker::ledger::LedgerClient;
use anomaly_worker::scoring::ModelHandle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(None)?;
    info!(backend = %config.backend.base_url, "Starting anomaly worker");

    let registry = Arc::new(match &config.categories.path {
        Some(path) => CategoryRegistry::open(path),
        None => CategoryRegistry::in_memory(),
    });

    let scorer = Arc::new(match &config.model.path {
        Some(path) => ModelHandle::from_file(path),
        None => ModelHandle::empty(),
    });

    let source = Arc::new(LedgerClient::new(&config.backend)?);
    let worker = Arc::new(Worker::new(source, scorer, registry));

    ConsumerLoop::new(config.amqp.clone(), worker).run().await;

    Ok(())
}
