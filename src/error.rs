//! Worker error taxonomy.
//!
//! Malformed events and ledger fetch failures are absorbed where they
//! occur (dropped or degraded to an empty record set) and never surface
//! as errors; the variants here are the failures that do propagate.

/// Errors surfaced by the broker layer and result publishing.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("topology declaration failed: {0}")]
    Topology(String),

    #[error("failed to publish result: {0}")]
    Publish(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_detail() {
        let err = WorkerError::Connection("refused".to_string());
        assert!(err.to_string().contains("refused"));

        let err = WorkerError::Publish("channel closed".to_string());
        assert!(err.to_string().contains("channel closed"));
    }
}
