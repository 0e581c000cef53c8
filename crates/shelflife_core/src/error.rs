//! Pipeline error taxonomy.
//!
//! Per-key failures are aggregated by the engines and never surface here
//! as a stage failure; stage-level failures are recorded in the execution log.

/// Core result type
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// No rows exist for the requested window
    #[error("No data available: {what}")]
    DataUnavailable {
        /// Description of the missing input
        what: String,
    },

    /// Derivation of a single key failed
    #[error("Computation failed for {key}: {reason}")]
    Computation {
        /// Natural key of the failing row
        key: String,
        /// Failure reason
        reason: String,
    },

    /// Storage write or read failed
    #[error("Persistence error: {reason}")]
    Persistence {
        /// Backend failure reason
        reason: String,
    },

    /// A job with the same name is already running
    #[error("Job '{job_name}' is already running")]
    ConcurrencyConflict {
        /// Job name
        job_name: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of entity
        kind: String,
        /// Identifier
        id: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Failure reason
        reason: String,
    },

    /// A worker task panicked; rerunning the same input would panic again
    #[error("Task panicked: {message}")]
    Panicked {
        /// Panic description
        message: String,
    },

    /// Cancelled at a stage boundary
    #[error("Cancelled before stage {stage}")]
    Cancelled {
        /// Stage that did not start
        stage: String,
    },
}

impl PipelineError {
    /// Whether a retry of the failed attempt may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. } | Self::Computation { .. })
    }

    /// Shorthand for a validation error
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence {
            reason: format!("JSON encoding failed: {}", err),
        }
    }
}

impl From<postcard::Error> for PipelineError {
    fn from(err: postcard::Error) -> Self {
        Self::Persistence {
            reason: format!("canonical encoding failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::NotFound {
            kind: "Job".to_string(),
            id: "nightly".to_string(),
        };
        assert_eq!(format!("{}", err), "Job not found: nightly");

        let err = PipelineError::ConcurrencyConflict {
            job_name: "nightly_feature_build".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Job 'nightly_feature_build' is already running"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::Persistence { reason: "disk".into() }.is_retryable());
        assert!(!PipelineError::ConcurrencyConflict { job_name: "j".into() }.is_retryable());
        assert!(!PipelineError::Cancelled { stage: "risk".into() }.is_retryable());
        assert!(!PipelineError::DataUnavailable { what: "sales".into() }.is_retryable());
        assert!(!PipelineError::Panicked { message: "overflow".into() }.is_retryable());
    }

    #[test]
    fn test_validation_shorthand() {
        let err = PipelineError::validation("window_days", "must be positive");
        assert!(err.to_string().contains("window_days"));
        assert!(err.to_string().contains("must be positive"));
    }
}
