//! Error types for the pk bridges.

use thiserror::Error;

use crate::engine::EngineFailure;

/// Errors surfaced to callers of the encryption and decryption bridges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PkError {
    /// A buffer or context could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// Null or stale handle, or a missing caller buffer.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Missing key material, or a context that has no key yet.
    #[error("invalid key")]
    InvalidKey,

    /// The engine rejected the operation; carries its own diagnostic.
    #[error("{0}")]
    EngineError(String),

    /// The secure random provider could not supply entropy.
    #[error("random source failure: {0}")]
    RandomSourceError(String),
}

impl From<EngineFailure> for PkError {
    fn from(failure: EngineFailure) -> Self {
        PkError::EngineError(failure.message().to_owned())
    }
}
