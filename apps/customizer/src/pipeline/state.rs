//! Per-run workflow state and the stage machine it advances through.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::resume::GroupId;
use crate::pipeline::errors::PipelineError;
use crate::research::ResearchRecord;

/// Position of a work entry in `ResumeDocument::work`.
pub type EntryIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Research,
    RoleSelect,
    GroupSelect,
    Construct,
    Review,
    Summarize,
    Done,
    Failed,
}

impl Stage {
    /// The stage that follows on success. Terminal stages map to themselves.
    pub fn next(self) -> Stage {
        match self {
            Stage::Research => Stage::RoleSelect,
            Stage::RoleSelect => Stage::GroupSelect,
            Stage::GroupSelect => Stage::Construct,
            Stage::Construct => Stage::Review,
            Stage::Review => Stage::Summarize,
            Stage::Summarize => Stage::Done,
            Stage::Done => Stage::Done,
            Stage::Failed => Stage::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Research => "RESEARCH",
            Stage::RoleSelect => "ROLE_SELECT",
            Stage::GroupSelect => "GROUP_SELECT",
            Stage::Construct => "CONSTRUCT",
            Stage::Review => "REVIEW",
            Stage::Summarize => "SUMMARIZE",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses one produced sentence: a group within a selected entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SentenceKey {
    pub entry: EntryIndex,
    pub group: GroupId,
}

impl SentenceKey {
    pub fn new(entry: EntryIndex, group: impl Into<GroupId>) -> Self {
        Self {
            entry,
            group: group.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedEntry {
    pub entry: EntryIndex,
    pub title: String,
}

/// The job a run tailors the resume for.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub description: String,
    /// Skips name extraction during RESEARCH when set.
    pub company_name: Option<String>,
}

/// Everything the stages have produced so far in one run.
///
/// Owned by the orchestrator. Each stage contributes exactly one `StageUpdate`, applied
/// only after the stage has fully succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowState {
    pub company_research: Option<ResearchRecord>,
    /// Kept in resume order.
    pub selected_entries: Vec<SelectedEntry>,
    pub selected_groups: IndexMap<EntryIndex, Vec<GroupId>>,
    pub constructed_sentences: IndexMap<SentenceKey, String>,
    pub reviewed_sentences: IndexMap<SentenceKey, String>,
    pub summary: Option<String>,
}

/// The complete output of one stage.
#[derive(Debug, Clone)]
pub enum StageUpdate {
    Research(Option<ResearchRecord>),
    Roles(Vec<SelectedEntry>),
    Groups(IndexMap<EntryIndex, Vec<GroupId>>),
    Constructed(IndexMap<SentenceKey, String>),
    Reviewed(IndexMap<SentenceKey, String>),
    Summary(String),
}

impl WorkflowState {
    pub fn apply(&mut self, update: StageUpdate) {
        match update {
            StageUpdate::Research(record) => self.company_research = record,
            StageUpdate::Roles(entries) => self.selected_entries = entries,
            StageUpdate::Groups(groups) => self.selected_groups = groups,
            StageUpdate::Constructed(sentences) => self.constructed_sentences = sentences,
            StageUpdate::Reviewed(sentences) => self.reviewed_sentences = sentences,
            StageUpdate::Summary(summary) => self.summary = Some(summary),
        }
    }

    /// The title chosen for an entry, if it was selected.
    pub fn title_of(&self, entry: EntryIndex) -> Option<&str> {
        self.selected_entries
            .iter()
            .find(|selected| selected.entry == entry)
            .map(|selected| selected.title.as_str())
    }

    /// Final text for a sentence: reviewed if review ran, else constructed.
    pub fn final_sentence(&self, key: &SentenceKey) -> Option<&str> {
        self.reviewed_sentences
            .get(key)
            .or_else(|| self.constructed_sentences.get(key))
            .map(String::as_str)
    }
}

/// How a run ended. Partial state from a failed run is dropped, never returned.
#[derive(Debug)]
pub enum RunOutcome {
    Done(WorkflowState),
    Failed { stage: Stage, error: PipelineError },
}

impl RunOutcome {
    pub fn status(&self) -> Stage {
        match self {
            RunOutcome::Done(_) => Stage::Done,
            RunOutcome::Failed { .. } => Stage::Failed,
        }
    }
}
