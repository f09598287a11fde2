use thiserror::Error;

/// Errors returned to callers of the portfolio operations.
///
/// Per-ticker price failures never show up here; they are folded into the
/// snapshot's failure list by the refresh cycle.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("ticker not found: {0}")]
    NotFound(String),

    #[error("ticker already locked: {0}")]
    AlreadyLocked(String),

    #[error("lock key does not match for ticker {0}")]
    TokenMismatch(String),

    #[error("ticker {0} is not locked; lock it first and pass its lock key")]
    LockRequired(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("portfolio store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
