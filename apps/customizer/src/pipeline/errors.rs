use thiserror::Error;

use crate::llm_client::GenerationError;
use crate::pipeline::state::Stage;

/// Errors that end a run in `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Retry budget spent; carries the last underlying failure.
    #[error("stage {stage} exhausted after {attempts} attempt(s): {last_error}")]
    StageExhausted {
        stage: Stage,
        attempts: u32,
        last_error: GenerationError,
    },

    #[error("run cancelled before stage {0} started")]
    Cancelled(Stage),
}

impl PipelineError {
    /// The stage the run failed in (or, when cancelled, the stage that never started).
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::StageExhausted { stage, .. } => *stage,
            PipelineError::Cancelled(stage) => *stage,
        }
    }
}
