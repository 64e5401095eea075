//! Error types for the Forgeflow core library.
//!
//! The taxonomy separates caller mistakes (`Validation`, `NotFound`) from
//! provider failures (`TransientProvider`, `PermanentProvider`) so the
//! activity retry layer can decide what is worth retrying.

use thiserror::Error;

/// Result type alias using the Forgeflow [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Forgeflow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request or decision. Signal handlers log and no-op.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown unit or step. Signal handlers log and no-op.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Retryable collaborator failure (network blip, lock contention).
    #[error("Transient provider failure: {0}")]
    TransientProvider(String),

    /// Non-retryable collaborator failure.
    #[error("Permanent provider failure: {0}")]
    PermanentProvider(String),

    /// A poll or retry budget ran out. Callers degrade gracefully.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Remediation budget exhausted below the acceptance threshold.
    #[error("Quality threshold not met: score {score:.1} after {attempts} attempt(s)")]
    QualityThreshold { score: f64, attempts: u32 },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file parse error
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the bounded-retry activity layer should retry this failure.
    ///
    /// Only transient provider failures qualify; timeouts degrade
    /// gracefully at the call site instead of being retried blindly.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider(_))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(Error::TransientProvider("registry busy".into()).is_retryable());
    }

    #[test]
    fn permanent_and_timeout_are_not_retryable() {
        assert!(!Error::PermanentProvider("bad credentials".into()).is_retryable());
        assert!(!Error::Timeout("parent wait ceiling".into()).is_retryable());
        assert!(!Error::Validation("empty unit id".into()).is_retryable());
        assert!(!Error::NotFound("unit x".into()).is_retryable());
    }

    #[test]
    fn quality_threshold_formats_score() {
        let err = Error::QualityThreshold {
            score: 72.5,
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("72.5"), "message should carry score: {msg}");
        assert!(msg.contains('3'), "message should carry attempts: {msg}");
    }
}
