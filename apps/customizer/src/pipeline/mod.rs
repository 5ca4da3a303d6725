//! Pipeline Orchestrator: the six-stage run that tailors a modular resume to a job.

pub mod errors;
pub mod handlers;
pub mod orchestrator;
mod prompts;
pub mod retry;
mod stages;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::PipelineError;
pub use orchestrator::{Pipeline, PipelineSettings};
pub use state::{JobContext, RunOutcome, Stage, WorkflowState};
