//! Drives a run through the stage machine.
//!
//! RESEARCH → ROLE_SELECT → GROUP_SELECT → CONSTRUCT → REVIEW → SUMMARIZE → DONE, with
//! FAILED reachable from any stage. Stages run strictly one after another and the run's
//! `WorkflowState` has a single writer: this loop.

use std::sync::Arc;

use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm_client::TextGenerationCapability;
use crate::models::resume::ResumeDocument;
use crate::pipeline::errors::PipelineError;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::state::{JobContext, RunOutcome, Stage, WorkflowState};
use crate::research::ResearchCache;

/// Run-time knobs supplied by configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub research_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            research_ttl: Duration::days(30),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    pub(crate) capability: Arc<dyn TextGenerationCapability>,
    pub(crate) cache: Arc<ResearchCache>,
    pub(crate) settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        capability: Arc<dyn TextGenerationCapability>,
        cache: Arc<ResearchCache>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            capability,
            cache,
            settings,
        }
    }

    pub async fn run(&self, resume: &ResumeDocument, job: &JobContext) -> RunOutcome {
        self.run_with_cancellation(resume, job, &CancellationToken::new())
            .await
    }

    /// Runs the stage machine, checking `cancel` between stages. A stage already in
    /// flight finishes first.
    pub async fn run_with_cancellation(
        &self,
        resume: &ResumeDocument,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let run_id = Uuid::new_v4();
        self.drive(resume, job, cancel)
            .instrument(info_span!("pipeline_run", %run_id))
            .await
    }

    async fn drive(
        &self,
        resume: &ResumeDocument,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut state = WorkflowState::default();
        let mut stage = Stage::Research;
        info!(entries = resume.work.len(), "Pipeline run started");

        loop {
            if stage.is_terminal() {
                break;
            }
            if cancel.is_cancelled() {
                warn!(%stage, "Run cancelled");
                return RunOutcome::Failed {
                    stage,
                    error: PipelineError::Cancelled(stage),
                };
            }

            info!(%stage, "Stage started");
            let result = match stage {
                Stage::Research => Ok(self.research(job).await),
                Stage::RoleSelect => self.select_roles(resume, job, &state).await,
                Stage::GroupSelect => self.select_groups(resume, job, &state).await,
                Stage::Construct => self.construct(resume, job, &state).await,
                Stage::Review => self.review(job, &state).await,
                Stage::Summarize => self.summarize(resume, job, &state).await,
                Stage::Done | Stage::Failed => break,
            };

            match result {
                Ok(update) => state.apply(update),
                Err(e) => {
                    error!(%stage, "Run failed: {e}");
                    return RunOutcome::Failed { stage, error: e };
                }
            }
            stage = stage.next();
        }

        info!(
            sentences = state.reviewed_sentences.len(),
            "Pipeline run complete"
        );
        RunOutcome::Done(state)
    }
}
