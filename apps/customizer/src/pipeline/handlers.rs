//! Axum route handler for running the pipeline over HTTP.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::errors::AppError;
use crate::models::resume::{GroupId, ResumeDocument};
use crate::pipeline::state::{SentenceKey, Stage};
use crate::pipeline::{JobContext, Pipeline, RunOutcome, WorkflowState};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CustomizeRequest {
    /// The modular resume, either as a YAML string or as the equivalent JSON object.
    pub resume: Value,
    pub job_description: String,
    #[serde(default)]
    pub company_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportSentence {
    pub group: GroupId,
    pub constructed: String,
    pub reviewed: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportEntry {
    pub entry_index: usize,
    pub title: String,
    pub company: String,
    pub start_date: String,
    pub end_date: String,
    pub location: String,
    pub sentences: Vec<ReportSentence>,
}

#[derive(Debug, Serialize)]
pub struct ResearchSummary {
    pub company_key: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

/// The final tailored content of a completed run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub status: Stage,
    pub candidate: String,
    pub entries: Vec<ReportEntry>,
    pub summary: Option<String>,
    pub research: Option<ResearchSummary>,
}

impl RunReport {
    pub fn from_state(resume: &ResumeDocument, state: &WorkflowState) -> Self {
        let entries = state
            .selected_entries
            .iter()
            .filter_map(|selected| {
                let entry = resume.work.get(selected.entry)?;
                let sentences = state
                    .selected_groups
                    .get(&selected.entry)
                    .into_iter()
                    .flatten()
                    .filter_map(|group| {
                        let key = SentenceKey::new(selected.entry, group.clone());
                        let constructed = state.constructed_sentences.get(&key)?;
                        Some(ReportSentence {
                            group: group.clone(),
                            constructed: constructed.clone(),
                            reviewed: state.reviewed_sentences.get(&key).cloned(),
                        })
                    })
                    .collect();

                Some(ReportEntry {
                    entry_index: selected.entry,
                    title: selected.title.clone(),
                    company: entry.primary_company().to_string(),
                    start_date: entry.start_date.clone(),
                    end_date: entry.end_date.clone(),
                    location: entry.location.clone(),
                    sentences,
                })
            })
            .collect();

        Self {
            status: Stage::Done,
            candidate: resume.basics.name.clone(),
            entries,
            summary: state.summary.clone(),
            research: state
                .company_research
                .as_ref()
                .map(|record| ResearchSummary {
                    company_key: record.company_key.clone(),
                    created_at: record.created_at,
                    content: record.content.clone(),
                }),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/resumes/customize
///
/// Validates the resume, runs all six stages, and returns the tailored content.
/// A failed run reports the stage and cause; its partial state is discarded.
pub async fn handle_customize(
    State(state): State<AppState>,
    Json(request): Json<CustomizeRequest>,
) -> Result<Json<RunReport>, AppError> {
    if request.job_description.trim().is_empty() {
        return Err(AppError::Validation(
            "job_description cannot be empty".to_string(),
        ));
    }

    let resume = match request.resume {
        Value::String(raw) => ResumeDocument::load(&raw)?,
        other => ResumeDocument::from_value(other)?,
    };
    let job = JobContext {
        description: request.job_description,
        company_name: request.company_name,
    };

    let pipeline = Pipeline::new(
        state.llm.clone(),
        state.research_cache.clone(),
        state.config.pipeline_settings(),
    );

    let outcome = pipeline
        .run_with_cancellation(&resume, &job, &state.shutdown.child_token())
        .await;
    info!(status = %outcome.status(), "Customize request finished");

    match outcome {
        RunOutcome::Done(workflow) => Ok(Json(RunReport::from_state(&resume, &workflow))),
        RunOutcome::Failed { stage, error } => Err(AppError::PipelineFailed {
            stage,
            message: error.to_string(),
        }),
    }
}
