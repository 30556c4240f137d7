//! Error types for the simulator core and its ingestion/reporting boundary.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors surfaced by the cache engine, the replay driver, the analyzer,
/// and the trace-ingestion boundary.
#[derive(Debug, Error)]
pub enum SimError {
    /// A run configuration failed validation before any simulation started.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A request's timestamp was earlier than the simulator's clock.
    #[error("clock regression: received timestamp {received} after clock had advanced to {clock}")]
    ClockRegression { clock: f64, received: f64 },

    /// The trace source could not produce another chunk and the failure is
    /// not a normal end-of-stream (I/O error, malformed record, a cursor an
    /// external index invalidated mid-scan).
    #[error("trace ingestion failed: {0}")]
    Ingestion(String),

    /// A worker task (simulator or analyzer) terminated unexpectedly.
    #[error("worker task for instance '{label}' failed: {reason}")]
    WorkerFailed { label: String, reason: String },

    /// Writing an analyzer report failed.
    #[error("failed to write report '{path}': {source}")]
    Report {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Wraps the underlying I/O error for the trace source / CSV writers.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON request record failed to parse.
    #[error("malformed request record: {0}")]
    MalformedRecord(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_regression_display() {
        let err = SimError::ClockRegression {
            clock: 10.0,
            received: 9.5,
        };
        let msg = format!("{err}");
        assert!(msg.contains("10"));
        assert!(msg.contains("9.5"));
    }

    #[test]
    fn config_error_carries_message() {
        let err = SimError::Config("capacity must be positive".into());
        assert!(format!("{err}").contains("capacity must be positive"));
    }
}
