//! crates/hbd_core/src/error.rs
//!
//! The error taxonomy shared by the issuer and the scheduler.

use crate::crypto::CryptoError;
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed or missing input: bad date, time, timezone or email.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Credential mismatch or an invalid/expired token. Deliberately carries
    /// no detail about which part failed.
    #[error("Invalid credentials")]
    Authentication,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl From<PortError> for CoreError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(msg) => CoreError::NotFound(msg),
            PortError::Conflict(msg) => CoreError::Conflict(msg),
            PortError::Unexpected(msg) => CoreError::Storage(msg),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
