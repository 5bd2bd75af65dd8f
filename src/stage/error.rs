//! Stage error types

use crate::core::StageResult;
use thiserror::Error;

/// Ways a stage can fail
///
/// Stages never let these escape: [`StageError::into_result`] turns them into
/// a [`StageResult::Failure`] that the orchestrator records.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing required input '{0}'")]
    MissingInput(String),

    #[error("invalid input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("stage process failed: {0}")]
    Process(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("stage produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("stage reported an error: {0}")]
    Reported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    /// Short machine-readable category, stored as `error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::MissingInput(_) => "missing_input",
            StageError::InvalidInput { .. } => "invalid_input",
            StageError::Process(_) => "process",
            StageError::Timeout(_) => "timeout",
            StageError::InvalidOutput(_) => "invalid_output",
            StageError::Reported(_) => "stage_error",
            StageError::Internal(_) => "internal",
        }
    }

    /// Convert into the failure record for `stage_id`
    pub fn into_result(self, stage_id: &str) -> StageResult {
        StageResult::failure(stage_id, self.kind(), self.to_string())
    }
}
