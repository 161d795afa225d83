//! Typed errors for the funnel library.
//!
//! Per-record failures (`ModelCallError`) never abort a run; run-level
//! failures (`FunnelError`) abort before any record is dispatched.

use thiserror::Error;

/// Failure of a single model-tier call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelCallError {
    /// Timeout, rate limit, 5xx or connection failure. Retried with backoff.
    #[error("transient model error: {reason}")]
    Transient { reason: String },

    /// Response failed JSON / schema / field-completeness validation. Retried once.
    #[error("malformed model response: {reason}")]
    Malformed { reason: String },

    /// Provider refused the request for a reason retrying cannot fix (auth, bad request).
    #[error("model call rejected: {reason}")]
    Rejected { reason: String },
}

impl ModelCallError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Malformed { .. } => "malformed",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Errors raised by the persistent store / record source.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record not found: {record_id}")]
    NotFound { record_id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Run-level errors. Anything here stops the run before records are processed.
#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
