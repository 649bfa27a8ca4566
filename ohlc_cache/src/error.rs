//! Error taxonomy for the cache.
//!
//! Caller mistakes ([`CacheError::InvalidRange`], [`CacheError::InvalidSymbol`]) surface
//! immediately. [`CacheError::UpstreamUnavailable`] is transient and only escapes the
//! fetcher after retries; the coordinator turns it into a `partial` series. Conflicting
//! history and malformed bars are not errors at all: see
//! [`crate::store::ConsistencyViolation`] and [`crate::fetcher::RejectedBar`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared_utils::config::ConfigError;
use thiserror::Error;

use crate::{calendar::DayRange, store::StoreError};

/// Errors returned by the cache's public operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `from` is after `to`.
    #[error("invalid range: {from} is after {to}")]
    InvalidRange {
        /// Requested start.
        from: DateTime<Utc>,
        /// Requested end.
        to: DateTime<Utc>,
    },

    /// Symbol is empty or contains characters no provider accepts.
    #[error("invalid symbol `{0}`")]
    InvalidSymbol(String),

    /// The provider errored or timed out on every attempt.
    #[error("upstream unavailable for {symbol} {window} after {attempts} attempt(s): {message}")]
    UpstreamUnavailable {
        /// Symbol being fetched.
        symbol: String,
        /// Daily window that could not be fetched.
        window: DayRange,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last provider error.
        message: String,
    },

    /// Storage failure. Not retried here.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A shared in-flight fetch failed; every waiter sees the same error.
    #[error("shared fetch failed: {0}")]
    InFlight(Arc<CacheError>),

    /// The task running a shared fetch panicked or was aborted.
    #[error("shared fetch task did not complete: {0}")]
    TaskJoin(String),
}

impl CacheError {
    /// Whether this error only means upstream data could not be obtained right now.
    pub fn is_upstream(&self) -> bool {
        match self {
            CacheError::UpstreamUnavailable { .. } => true,
            CacheError::InFlight(inner) => inner.is_upstream(),
            _ => false,
        }
    }
}
