use thiserror::Error;

/// Error kinds surfaced by the core engine (spec §7).
///
/// Transient-remote errors are retried with backoff by the caller; every
/// other kind is reported to the caller verbatim.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not authorised: {0}")]
    NotAuthorised(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("transient remote error: {0}")]
    TransientRemote(String),

    #[error("permanent remote error: {0}")]
    PermanentRemote(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Network-class errors are retried with backoff; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientRemote(_) | EngineError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("balance overflow")]
    Overflow,

    #[error("insufficient balance: need {need}, have {have}")]
    Insufficient { need: u64, have: u64 },
}

impl From<BalanceError> for EngineError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::Overflow => EngineError::Internal("balance overflow".to_owned()),
            BalanceError::Insufficient { need, have } => {
                EngineError::InsufficientFunds { need, have }
            }
        }
    }
}
