use crate::global_id::GlobalIdError;
use crate::guard::Denied;
use crate::store::StoreError;

/// Failures surfaced by [`crate::ProjectLifecycle`].
///
/// A failed invalidation publish is not an error here: the mutation already
/// committed, so it is reported on the receipt as a
/// [`crate::PublishFault`].
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid reference: {0}")]
    InvalidReference(#[from] GlobalIdError),

    #[error("Unknown project: {0}")]
    NotFound(String),

    #[error(transparent)]
    ProtectedEntity(#[from] Denied),

    #[error("storage fault: {0}")]
    StorageFault(#[from] StoreError),
}

impl LifecycleError {
    /// Only storage faults can go away on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::StorageFault(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_id::NodeKind;

    #[test]
    fn test_protected_entity_keeps_guard_message() {
        let err = LifecycleError::from(Denied::DefaultProject("default".to_string()));
        assert_eq!(err.to_string(), "Cannot delete the default project");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_follows_storage_cause() {
        let transient = LifecycleError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert!(transient.is_retryable());

        let fatal = LifecycleError::from(StoreError::ChunkTooLarge {
            requested: 11,
            limit: 10,
        });
        assert!(!fatal.is_retryable());

        let caller = LifecycleError::from(GlobalIdError::KindMismatch {
            expected: NodeKind::Project,
            found: NodeKind::Trace,
        });
        assert!(!caller.is_retryable());
    }
}
