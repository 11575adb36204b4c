//! Error taxonomy for lodo
//!
//! Storage and validation errors propagate synchronously to the caller so
//! the UI can give immediate feedback. Delivery errors are absorbed into
//! the outbox retry state machine and only surface after retries are
//! exhausted.

use thiserror::Error;

use crate::models::TaskId;

/// Errors from the durable store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The persistence mechanism could not be opened at all. Fatal to
    /// everything persistence-backed; callers should fall back to the
    /// in-memory degraded mode rather than crash.
    #[error("Storage unavailable: {details}")]
    Unavailable { details: String },

    /// A specific read/write/transaction failed. The mutation was not
    /// applied (transactions roll back), never half-applied.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to encode or decode a task snapshot for the outbox
    #[error("Task snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Task text was empty or whitespace-only; rejected before any write
    #[error("Task text cannot be empty")]
    EmptyText,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from a remote delivery attempt
///
/// Not surfaced per-attempt; the coordinator retries up to the configured
/// bound and marks the entry failed after that.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The remote endpoint could not be reached
    #[error("Remote endpoint unreachable: {0}")]
    Unreachable(String),

    /// The remote endpoint rejected the mutation
    #[error("Remote endpoint rejected mutation for task {task_id}: {reason}")]
    Rejected { task_id: TaskId, reason: String },
}

/// Errors from the platform wake-up capability
///
/// Registration is always best-effort; callers log these and move on.
#[derive(Error, Debug)]
pub enum WakeError {
    #[error("Wake channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable {
            details: "database is locked".to_string(),
        };
        assert!(err.to_string().contains("Storage unavailable"));
        assert!(err.to_string().contains("database is locked"));

        assert_eq!(StoreError::EmptyText.to_string(), "Task text cannot be empty");
    }

    #[test]
    fn test_database_error_conversion() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_delivery_error_display() {
        let err = DeliveryError::Rejected {
            task_id: TaskId(7),
            reason: "conflict".to_string(),
        };
        assert!(err.to_string().contains("task 7"));
        assert!(err.to_string().contains("conflict"));
    }
}
