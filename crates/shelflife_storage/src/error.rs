//! Storage errors.

use shelflife_core::PipelineError;

/// Storage result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A RUNNING execution already exists for the job
    Conflict {
        /// Job name
        job_name: String,
    },
    /// Record not found
    NotFound {
        /// Kind of record
        kind: &'static str,
        /// Identifier
        id: String,
    },
    /// Identifier or row rejected at the write boundary
    InvalidKey {
        /// Offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },
    /// Value could not be encoded or decoded
    Serialization {
        /// Codec failure
        reason: String,
    },
    /// Backend failure
    Backend {
        /// Backend failure reason
        reason: String,
    },
    /// A writer panicked while holding the lock
    LockPoisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict { job_name } => write!(f, "Job '{}' is already running", job_name),
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::InvalidKey { key, reason } => write!(f, "Invalid key '{}': {}", key, reason),
            Self::Serialization { reason } => write!(f, "Serialization error: {}", reason),
            Self::Backend { reason } => write!(f, "Backend error: {}", reason),
            Self::LockPoisoned => write!(f, "Store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { job_name } => PipelineError::ConcurrencyConflict { job_name },
            StoreError::NotFound { kind, id } => PipelineError::NotFound {
                kind: kind.to_string(),
                id,
            },
            StoreError::InvalidKey { key, reason } => PipelineError::Validation {
                field: key,
                reason,
            },
            other => PipelineError::Persistence {
                reason: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

macro_rules! backend_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    Self::Backend {
                        reason: err.to_string(),
                    }
                }
            }
        )*
    };
}

backend_error!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_concurrency_conflict() {
        let err: PipelineError = StoreError::Conflict {
            job_name: "nightly_risk_scoring".to_string(),
        }
        .into();
        assert_eq!(
            err,
            PipelineError::ConcurrencyConflict {
                job_name: "nightly_risk_scoring".to_string()
            }
        );
    }

    #[test]
    fn test_backend_maps_to_persistence() {
        let err: PipelineError = StoreError::LockPoisoned.into();
        assert!(matches!(err, PipelineError::Persistence { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = StoreError::InvalidKey {
            key: "S|1".to_string(),
            reason: "contains separator".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid key 'S|1': contains separator");
    }
}
