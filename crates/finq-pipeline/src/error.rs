//! Pipeline error taxonomy
//!
//! Every stage failure maps to exactly one entry so callers can tell what
//! went wrong. Validation and runtime execution failures are recovered
//! locally by the retry loop and only surface as `Abandoned` once the
//! attempt budget is spent; everything else propagates directly.

use thiserror::Error;

/// Which stage the final failed attempt died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonedStage {
    Validation,
    Execution,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Column selection failed: {0}")]
    Selection(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error(
        "Gave up after {attempts} attempts. Last attempted SQL: {last_sql} — last error: {last_error}"
    )]
    Abandoned {
        attempts: u32,
        last_sql: String,
        last_error: String,
        last_stage: AbandonedStage,
    },
}

impl PipelineError {
    /// Wire-level error kind for the query interface.
    pub fn error_kind(&self) -> &'static str {
        match self {
            PipelineError::Retrieval(_) => "retrieval_failed",
            PipelineError::Selection(_) => "selection_failed",
            PipelineError::Generation(_) => "generation_failed",
            PipelineError::Validation(_) => "validation_failed",
            PipelineError::Execution(_) => "execution_failed",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Abandoned { last_stage, .. } => match last_stage {
                AbandonedStage::Validation => "validation_failed",
                AbandonedStage::Execution => "execution_failed",
            },
        }
    }
}
