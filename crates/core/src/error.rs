//! Forum error model.

use thiserror::Error;

/// Result type used across the forum crates.
pub type ForumResult<T> = Result<T, ForumError>;

/// Forum-level error.
///
/// Business rejections (`NotFound` .. `Conflict`) are deterministic given the
/// store state and must not be retried. `Store` is the only variant that
/// reflects an infrastructure failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForumError {
    /// A category, topic, user, restriction or registration request is missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The permission resolver denied the action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A uniqueness constraint rejected a create.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A single-item state transition targeted the state the item is already in.
    #[error("already in state: {0}")]
    AlreadyInState(String),

    /// Malformed input (empty content, self-restriction, bad identifier).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic concurrency check failed (stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure in the backing store.
    #[error("store error: {0}")]
    Store(String),
}

impl ForumError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn already_in_state(msg: impl Into<String>) -> Self {
        Self::AlreadyInState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_renders_entity_and_id() {
        let err = ForumError::not_found("topic", 42);
        assert_eq!(err.to_string(), "topic not found: 42");
    }

    #[test]
    fn only_store_errors_are_transient() {
        assert!(ForumError::store("connection reset").is_transient());
        assert!(!ForumError::validation("empty").is_transient());
        assert!(!ForumError::conflict("stale").is_transient());
    }
}
