use thiserror::Error;

use cyphur_net::NetError;
use cyphur_shared::ProtocolError;
use cyphur_store::StoreError;

/// Errors surfaced by session entry points.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The conversation or message no longer exists. Expected under
    /// concurrent delete races; callers usually stay silent.
    #[error("Not found")]
    NotFound,

    /// Rejected before any state mutation or emission.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A privileged-only operation attempted by an ordinary user; rejected
    /// locally, nothing is emitted.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Emission failed; never retried.
    #[error("Transport error: {0}")]
    Transport(#[from] NetError),

    /// A wire frame could not be encoded.
    #[error("Frame codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The persistence layer failed outside of a lenient load path.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::Validation(msg) => Self::Validation(msg),
            other => Self::Persistence(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
