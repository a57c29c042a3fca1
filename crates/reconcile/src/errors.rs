//! Error and retry-policy types for the reconciliation domain.
//!
//! Each port has its own error type ([`StoreError`], [`QueueError`],
//! [`SettingsError`]); payload decoding failures are reported as
//! [`DecodeError`].
//!
//! [`RetryPolicy`] is a cross-cutting concern: the queue worker asks an error
//! for its policy to decide between redelivering an item and dead-lettering it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{QueueItemId, RecordId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: the backing store or queue is temporarily unreachable.
/// - `NonRetryable` errors: the input itself is bad, or the store rejected the
///   operation outright. Retrying would produce the same result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means the caller's
        /// own schedule applies (the next worker tick).
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Content store errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`crate::ContentStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached; the same call may succeed later.
    #[error("content store unavailable: {message}")]
    Unavailable {
        /// Description of the underlying failure.
        message: String,
    },

    /// The record addressed by an update or delete does not exist.
    #[error("record {id} not found")]
    NotFound {
        /// The record id that was addressed.
        id: RecordId,
    },

    /// The store refused a write that would break one of its invariants.
    #[error("content store conflict: {message}")]
    Conflict {
        /// Description of the violated invariant.
        message: String,
    },

    /// Another handle already owns the store's files.
    #[error("content store at {path} is locked by another process")]
    Locked {
        /// The lock file that could not be acquired.
        path: String,
    },

    /// Any other backend failure (corrupt data, serialisation problems).
    #[error("content store backend error: {message}")]
    Backend {
        /// Description of the underlying failure.
        message: String,
    },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            StoreError::Unavailable { .. } => RetryPolicy::Retryable { after: None },
            StoreError::NotFound { .. }
            | StoreError::Conflict { .. }
            | StoreError::Locked { .. }
            | StoreError::Backend { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding errors
// ---------------------------------------------------------------------------

/// A queued payload could not be decoded into a notification.
///
/// Never retryable: the payload bytes do not change between attempts.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON, or a known field has the wrong type.
    #[error("malformed notification payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Queue errors
// ---------------------------------------------------------------------------

/// Failures reported by [`crate::WorkQueue`] and [`crate::DeadLetterQueue`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue backend could not be reached.
    #[error("queue unavailable: {message}")]
    Unavailable {
        /// Description of the underlying failure.
        message: String,
    },

    /// An acknowledge, release, or take addressed an item the queue does not hold.
    #[error("queue item {id} is not known to the queue")]
    UnknownItem {
        /// The item id that was addressed.
        id: QueueItemId,
    },

    /// Another consumer already owns the queue.
    #[error("queue at {path} is locked by another process")]
    Locked {
        /// The lock file that could not be acquired.
        path: String,
    },

    /// Any other backend failure.
    #[error("queue backend error: {message}")]
    Backend {
        /// Description of the underlying failure.
        message: String,
    },
}

impl QueueError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings errors
// ---------------------------------------------------------------------------

/// Failures reading or writing the webhook settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings could not be read or written.
    #[error("settings unavailable: {message}")]
    Unavailable {
        /// Description of the underlying failure.
        message: String,
    },

    /// A settings value was rejected.
    #[error("invalid settings: {message}")]
    Invalid {
        /// Description of the rejected value.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_stores_are_retryable() {
        assert!(StoreError::unavailable("connection refused")
            .retry_policy()
            .is_retryable());
        assert_eq!(
            StoreError::NotFound {
                id: RecordId::new(3)
            }
            .retry_policy(),
            RetryPolicy::NonRetryable
        );
        assert_eq!(
            StoreError::backend("corrupt table").retry_policy(),
            RetryPolicy::NonRetryable
        );
    }

    #[test]
    fn decode_errors_carry_the_parser_message() {
        let err: DecodeError = serde_json::from_str::<serde_json::Value>("{")
            .expect_err("truncated json")
            .into();
        assert!(err.to_string().starts_with("malformed notification payload"));
    }
}
