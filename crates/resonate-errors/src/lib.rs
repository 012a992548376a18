//! Unified error types for the resonance-matching core.
//!
//! Every engine crate (RPB, ERS, DFRE, CHM) and every adapter (store, cache,
//! vector store, LLM) returns [`CoreError`]. Each failure domain gets its own
//! `thiserror` enum so call sites can match precisely; [`CoreError`] wraps
//! them with `#[from]` and exposes a coarse [`ErrorKind`] for propagation
//! policy (retry, surface to caller, log-and-skip) per the error handling
//! design.

use thiserror::Error;

/// The five propagation categories used throughout the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required entity (user, profile, conversation, match) is absent.
    NotFound,
    /// An upstream dependency (embedding, completion, vector store) failed.
    Upstream,
    /// An I/O deadline expired.
    Timeout,
    /// Caller-supplied input was out of range.
    Validation,
    /// No session/identity on a protected procedure.
    Unauthorized,
}

/// Typed persistence failures (Profile Store).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Other(String),
}

/// Vector store adapter failures.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector not found for id: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Cache adapter failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Embedding / completion interface failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limit window exhausted, retry after the sliding window clears")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    RequestFailed(String),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}

/// Unified core error. Every engine crate returns this at its public
/// boundary so callers (RPC handlers, scheduled-job runners) deal with one
/// type.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl CoreError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        CoreError::NotFound(entity.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    /// Coarse category used by retry policy and RPC propagation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Upstream(_) => ErrorKind::Upstream,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            CoreError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            CoreError::Store(_) => ErrorKind::Upstream,
            CoreError::VectorStore(VectorStoreError::NotFound(_)) => ErrorKind::NotFound,
            CoreError::VectorStore(_) => ErrorKind::Upstream,
            CoreError::Cache(_) => ErrorKind::Upstream,
            CoreError::Llm(LlmError::Timeout) => ErrorKind::Timeout,
            CoreError::Llm(LlmError::RateLimited) => ErrorKind::Upstream,
            CoreError::Llm(_) => ErrorKind::Upstream,
        }
    }

    /// Timeout-kind errors are retried under the same policy as upstream
    /// failures (spec §7: "Treated as Upstream for retry policy").
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Upstream | ErrorKind::Timeout)
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable_like_upstream() {
        let e = CoreError::Timeout("deadline".into());
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert!(e.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        let e = CoreError::validation("limit out of range");
        assert!(!e.is_retryable());
    }

    #[test]
    fn store_not_found_maps_to_not_found_kind() {
        let e: CoreError = StoreError::NotFound("user:123".into()).into();
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }
}
