//! Subsystem error types. Each collaborator that can fail gets its own
//! `thiserror` enum so callers can distinguish transient from permanent
//! failure where that distinction matters to a caller; `anyhow` is reserved
//! for the outermost process/task boundaries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
    #[error("no matching signing key for kid {0}")]
    UnknownKid(String),
    #[error("token signature invalid or expired: {0}")]
    Invalid(String),
    #[error("no usable key source configured")]
    NoKeySource,
}

impl TokenError {
    /// Transient failures are worth a retry by the caller; permanent ones
    /// never will be, no matter how many times the same token is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, TokenError::Unreachable(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("downstream RPC failed: {0}")]
    Failed(String),
    #[error("downstream RPC unavailable: {0}")]
    Unavailable(String),
}
