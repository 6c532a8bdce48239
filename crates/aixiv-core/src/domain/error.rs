//! Error taxonomy for the orchestration core.

use aixiv_state::{PaperState, StorageError};

/// Typed failure of one stage attempt or one completion call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("completion service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("completion service rate limited: {0}")]
    RateLimited(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("completion timed out after {0} ms")]
    Timeout(u64),

    /// The service refused the request itself (bad request, auth, unknown
    /// model); resending it cannot succeed.
    #[error("completion request rejected: {0}")]
    Rejected(String),
}

/// How the retry policy treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry with backoff until the attempt bound
    Transient,
    /// Retry once with a corrective prompt, then give up
    Structural,
    /// Never retried
    Fatal,
}

impl StageError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            StageError::ServiceUnavailable(_)
            | StageError::RateLimited(_)
            | StageError::Timeout(_) => RetryClass::Transient,
            StageError::InvalidOutput(_) => RetryClass::Structural,
            StageError::Rejected(_) => RetryClass::Fatal,
        }
    }

    /// Short machine-readable kind used in decision metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::ServiceUnavailable(_) => "service_unavailable",
            StageError::RateLimited(_) => "rate_limited",
            StageError::InvalidOutput(_) => "invalid_output",
            StageError::Timeout(_) => "timeout",
            StageError::Rejected(_) => "rejected",
        }
    }
}

/// Orchestrator-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RailError {
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("paper {paper_id} already has an active pipeline run")]
    RunAlreadyActive { paper_id: String },

    #[error("transition guard not met ({from} on {trigger}): {reason}")]
    GuardNotMet {
        from: PaperState,
        trigger: String,
        reason: String,
    },

    #[error("storage failure: {0}")]
    Storage(StorageError),

    #[error("paper not found: {0}")]
    PaperNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run task aborted: {0}")]
    TaskAborted(String),
}

impl From<StorageError> for RailError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ActiveRunExists { paper_id, .. } => {
                RailError::RunAlreadyActive { paper_id }
            }
            StorageError::NotFound { kind: "paper", id } => RailError::PaperNotFound(id),
            StorageError::NotFound { kind: "run", id } => RailError::RunNotFound(id),
            other => RailError::Storage(other),
        }
    }
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, RailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_structural_classes() {
        assert_eq!(StageError::Timeout(10).retry_class(), RetryClass::Transient);
        assert_eq!(
            StageError::RateLimited("429".into()).retry_class(),
            RetryClass::Transient
        );
        assert_eq!(
            StageError::InvalidOutput("no json".into()).retry_class(),
            RetryClass::Structural
        );
    }

    #[test]
    fn active_run_storage_error_maps_to_run_already_active() {
        let err: RailError = StorageError::ActiveRunExists {
            paper_id: "p1".into(),
            run_id: "r1".into(),
        }
        .into();
        assert!(matches!(err, RailError::RunAlreadyActive { paper_id } if paper_id == "p1"));
    }

    #[test]
    fn stage_error_display_names_the_stage() {
        let err = RailError::Stage {
            stage: "method".into(),
            source: StageError::Timeout(30_000),
        };
        assert!(err.to_string().contains("method"));
    }
}
