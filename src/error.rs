//! Errors raised by regional counter stores and the like write path.
//!
//! Store errors never cross the region client boundary: every `StoreError`
//! collapses into an Offline snapshot tagged with its `OfflineCause`.

use crate::redis::RespError;
use crate::region::OfflineCause;
use std::io::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Operation exceeded its allotted deadline
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u64,
    },
    /// Store unreachable or connection dropped
    #[error("connection failure: {0}")]
    Connection(#[from] std::io::Error),
    /// Store answered with something that is not a valid reply
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn cause(&self) -> OfflineCause {
        match self {
            StoreError::Timeout { .. } => OfflineCause::Timeout,
            StoreError::Connection(e) if e.kind() == ErrorKind::TimedOut => OfflineCause::Timeout,
            StoreError::Connection(_) => OfflineCause::ConnectionFailure,
            StoreError::Protocol(_) => OfflineCause::Protocol,
        }
    }
}

/// A client used up its likes for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit of {max_likes} likes reached, retry in {retry_after_ms}ms")]
pub struct RateLimited {
    pub max_likes: u64,
    pub retry_after_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LikeError {
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RespError> for StoreError {
    fn from(e: RespError) -> Self {
        match e {
            RespError::Io(io) => StoreError::Connection(io),
            RespError::Invalid(msg) => StoreError::Protocol(msg),
        }
    }
}
