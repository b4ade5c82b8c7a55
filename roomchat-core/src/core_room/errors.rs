/*
    errors.rs - Error types for the chat domain

    Shared by rooms, the room directory and the user directory. Gateway
    failures arrive as `StoreError` and are folded into `StorageUnavailable`
    so callers only branch on domain outcomes.
*/

use crate::core_store::StoreError;
use std::sync::PoisonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Room, user or message does not exist (or is soft-removed)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The persistence gateway could not complete the request
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Missing sender, alias too short, owner removal
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidOperation(msg) => ChatError::InvalidArgument(msg),
            other => ChatError::StorageUnavailable(other.to_string()),
        }
    }
}

pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> ChatError {
    ChatError::StorageUnavailable(
        "Lock poisoned: a thread panicked while holding the lock".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_become_storage_unavailable() {
        let err: ChatError = StoreError::Unavailable("offline".to_string()).into();
        assert!(matches!(err, ChatError::StorageUnavailable(_)));
        assert_eq!(err.to_string(), "Storage unavailable: Storage unavailable: offline");

        let err: ChatError = StoreError::Corrupted("doc 3".to_string()).into();
        assert!(matches!(err, ChatError::StorageUnavailable(_)));
    }
}
