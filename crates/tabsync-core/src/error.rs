//! Sync error taxonomy
//!
//! Every fallible operation in the engine returns [`SyncError`]. The variants
//! follow how the error must be handled rather than where it came from:
//!
//! - `NotFound` / `StorageWriteFailed`: local intent failures, reported to the caller
//! - `Transient` / `Timeout`: retried with backoff by the scheduler
//! - `Conflict`: the remote kept changing under a push; the whole pass is retried
//! - `Unauthorized` / `InvalidPayload` / `QuotaExceeded`: terminal, never retried

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::storage::StorageError;

/// Errors produced by the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    /// Target group vanished (e.g. concurrently deleted)
    #[error("Tab group {0} not found")]
    NotFound(Uuid),

    /// Tab not found inside a group
    #[error("Tab {tab_id} not found in group {group_id}")]
    TabNotFound { group_id: Uuid, tab_id: Uuid },

    /// Local write failed; the pre-operation snapshot was restored
    #[error("Failed to write tab groups during '{operation}': {source}")]
    StorageWriteFailed {
        operation: String,
        #[source]
        source: StorageError,
    },

    /// Local storage read failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Network or backend failure that may succeed on retry
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// A network call exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Credentials rejected by the backend
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend rejected the payload
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Backend quota or rate limit hit
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Another device kept writing a group while this one tried to push it
    #[error("Conflict on tab group {0}: remote changed during push")]
    Conflict(Uuid),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Map a backend error message onto the taxonomy
    ///
    /// Matching is case-insensitive and keyword based, the same way the
    /// backend reports failures in free text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("unauthorized") || lower.contains("forbidden") {
            SyncError::Unauthorized(message)
        } else if lower.contains("invalid") || lower.contains("malformed") {
            SyncError::InvalidPayload(message)
        } else if lower.contains("quota") || lower.contains("limit") {
            SyncError::QuotaExceeded(message)
        } else {
            SyncError::Transient(message)
        }
    }

    /// Terminal errors are surfaced immediately and never retried
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthorized(_) | SyncError::InvalidPayload(_) | SyncError::QuotaExceeded(_)
        )
    }

    /// Whether the retry loop should try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_) | SyncError::Timeout(_) | SyncError::Conflict(_)
        )
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_terminal_messages() {
        assert!(matches!(
            SyncError::classify("401 Unauthorized"),
            SyncError::Unauthorized(_)
        ));
        assert!(matches!(
            SyncError::classify("Forbidden for this user"),
            SyncError::Unauthorized(_)
        ));
        assert!(matches!(
            SyncError::classify("malformed group payload"),
            SyncError::InvalidPayload(_)
        ));
        assert!(matches!(
            SyncError::classify("storage quota reached"),
            SyncError::QuotaExceeded(_)
        ));
        assert!(matches!(
            SyncError::classify("rate limit"),
            SyncError::QuotaExceeded(_)
        ));
    }

    #[test]
    fn test_classify_defaults_to_transient() {
        let err = SyncError::classify("connection reset by peer");
        assert!(matches!(err, SyncError::Transient(_)));
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = SyncError::Timeout(Duration::from_secs(5));
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_push_conflict_is_retryable() {
        let err = SyncError::Conflict(Uuid::new_v4());
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_not_found_is_neither() {
        let err = SyncError::NotFound(Uuid::new_v4());
        assert!(!err.is_retryable());
        assert!(!err.is_terminal());
    }
}
