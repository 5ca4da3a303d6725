//! Stage bodies. Each reads the resume, the job and the state built so far, and returns
//! its whole contribution as one `StageUpdate`; nothing is written to the state until the
//! stage has finished.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::Utc;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::llm_client::prompts::{
    system_prompt, GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM, PLAIN_TEXT_SYSTEM,
};
use crate::llm_client::{clean_text_reply, parse_json_reply, strip_json_fences, GenerationError};
use crate::models::resume::{GroupId, ResponsibilityGroup, ResumeDocument, WorkEntry};
use crate::pipeline::errors::PipelineError;
use crate::pipeline::orchestrator::Pipeline;
use crate::pipeline::prompts::{
    CONSTRUCT_PROMPT, CONSTRUCT_ROLE, EXTRACT_COMPANY_PROMPT, GROUP_SELECT_PROMPT,
    GROUP_SELECT_ROLE, RESEARCH_PROMPT, RESEARCH_ROLE, REVIEW_PROMPT, REVIEW_ROLE,
    ROLE_SELECT_PROMPT, ROLE_SELECT_ROLE, SUMMARIZE_PROMPT, SUMMARIZE_ROLE,
};
use crate::pipeline::retry::StageRequest;
use crate::pipeline::state::{
    EntryIndex, JobContext, SelectedEntry, SentenceKey, Stage, StageUpdate, WorkflowState,
};
use crate::research::{normalize_key, ResearchRecord};
use crate::template::{self, ResolveError};

/// Company-name extraction only looks at the head of the posting.
const COMPANY_EXCERPT_CHARS: usize = 2000;
const UNKNOWN_COMPANY: &str = "UNKNOWN";

// ────────────────────────────────────────────────────────────────────────────
// Reply shapes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RoleReply {
    include: bool,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupReply {
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConstructReply {
    template_index: usize,
    #[serde(default)]
    values: IndexMap<String, String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Stages
// ────────────────────────────────────────────────────────────────────────────

impl Pipeline {
    /// RESEARCH: best effort. Every failure path continues with no research.
    pub(super) async fn research(&self, job: &JobContext) -> StageUpdate {
        let Some(company) = self.resolve_company_name(job).await else {
            info!("No company name found; continuing without research");
            return StageUpdate::Research(None);
        };

        match self
            .cache
            .get_async(&company, self.settings.research_ttl)
            .await
        {
            Ok(Some(record)) => {
                info!(company = %record.company_key, "Research cache hit");
                return StageUpdate::Research(Some(record));
            }
            Ok(None) => info!(company = %company, "Research cache miss"),
            Err(e) => warn!("Research cache lookup failed, treating as a miss: {e}"),
        }

        let system = system_prompt(RESEARCH_ROLE, JSON_ONLY_SYSTEM);
        let request = StageRequest {
            stage: Stage::Research,
            role: &system,
            instructions: RESEARCH_PROMPT.to_string(),
            context: json!({
                "stage": Stage::Research,
                "task": "research",
                "company_name": company,
            }),
        };
        let content = match self
            .settings
            .retry
            .generate(self.capability.as_ref(), &request, |reply| {
                non_empty_text(strip_json_fences(reply))
            })
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!("Company research unavailable, continuing without it: {e}");
                return StageUpdate::Research(None);
            }
        };

        let record = match self.cache.put_async(&company, &content).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Could not persist research for '{company}': {e}");
                ResearchRecord {
                    company_key: normalize_key(&company),
                    content,
                    created_at: Utc::now(),
                }
            }
        };
        StageUpdate::Research(Some(record))
    }

    /// Explicit name first, then the capability, then text patterns.
    async fn resolve_company_name(&self, job: &JobContext) -> Option<String> {
        if let Some(name) = job
            .company_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            return Some(name.to_string());
        }
        if job.description.trim().is_empty() {
            return None;
        }

        let excerpt: String = job.description.chars().take(COMPANY_EXCERPT_CHARS).collect();
        let system = system_prompt(RESEARCH_ROLE, PLAIN_TEXT_SYSTEM);
        let request = StageRequest {
            stage: Stage::Research,
            role: &system,
            instructions: EXTRACT_COMPANY_PROMPT.to_string(),
            context: json!({
                "stage": Stage::Research,
                "task": "extract_company",
                "job_description_excerpt": excerpt,
            }),
        };
        let extracted = self
            .settings
            .retry
            .generate(self.capability.as_ref(), &request, parse_company_name)
            .await;

        match extracted {
            Ok(Some(name)) => {
                debug!(company = %name, "Company name extracted");
                Some(name)
            }
            Ok(None) => company_from_patterns(&job.description),
            Err(e) => {
                warn!("Company name extraction failed ({e}); trying text patterns");
                company_from_patterns(&job.description)
            }
        }
    }

    /// ROLE_SELECT: one decision per work entry, in resume order.
    pub(super) async fn select_roles(
        &self,
        resume: &ResumeDocument,
        job: &JobContext,
        state: &WorkflowState,
    ) -> Result<StageUpdate, PipelineError> {
        let system = system_prompt(ROLE_SELECT_ROLE, JSON_ONLY_SYSTEM);
        let mut selected = Vec::new();

        for (index, entry) in resume.work.iter().enumerate() {
            let responsibilities: Vec<&str> = entry
                .responsibility_groups
                .values()
                .map(|group| group.original_sentence.as_str())
                .collect();
            let request = StageRequest {
                stage: Stage::RoleSelect,
                role: &system,
                instructions: ROLE_SELECT_PROMPT.to_string(),
                context: json!({
                    "stage": Stage::RoleSelect,
                    "job_description": job.description,
                    "company_research": research_content(state),
                    "entry_index": index,
                    "title_variants": entry.title_variants,
                    "company": entry.primary_company(),
                    "start_date": entry.start_date,
                    "end_date": entry.end_date,
                    "location": entry.location,
                    "responsibilities": responsibilities,
                }),
            };

            let choice = self
                .settings
                .retry
                .generate(self.capability.as_ref(), &request, |reply| {
                    parse_role_choice(entry, reply)
                })
                .await?;

            match choice {
                Some(title) => {
                    debug!(entry = index, title = %title, "Entry selected");
                    selected.push(SelectedEntry {
                        entry: index,
                        title,
                    });
                }
                None => debug!(entry = index, "Entry excluded"),
            }
        }

        info!(
            "Selected {} of {} work entries",
            selected.len(),
            resume.work.len()
        );
        Ok(StageUpdate::Roles(selected))
    }

    /// GROUP_SELECT: a subset of each selected entry's groups, kept in authored order.
    pub(super) async fn select_groups(
        &self,
        resume: &ResumeDocument,
        job: &JobContext,
        state: &WorkflowState,
    ) -> Result<StageUpdate, PipelineError> {
        let system = system_prompt(GROUP_SELECT_ROLE, JSON_ONLY_SYSTEM);
        let mut selected_groups: IndexMap<EntryIndex, Vec<GroupId>> = IndexMap::new();

        for selected in &state.selected_entries {
            let Some(entry) = resume.work.get(selected.entry) else {
                continue;
            };
            if entry.responsibility_groups.is_empty() {
                selected_groups.insert(selected.entry, Vec::new());
                continue;
            }

            let min_groups = minimum_groups(entry.responsibility_groups.len());
            let groups: IndexMap<&str, &str> = entry
                .responsibility_groups
                .iter()
                .map(|(id, group)| (id.as_str(), group.original_sentence.as_str()))
                .collect();
            let request = StageRequest {
                stage: Stage::GroupSelect,
                role: &system,
                instructions: GROUP_SELECT_PROMPT.replace("{min_groups}", &min_groups.to_string()),
                context: json!({
                    "stage": Stage::GroupSelect,
                    "job_description": job.description,
                    "company_research": research_content(state),
                    "title": selected.title,
                    "company": entry.primary_company(),
                    "responsibility_groups": groups,
                    "min_groups": min_groups,
                }),
            };

            let chosen = self
                .settings
                .retry
                .generate(self.capability.as_ref(), &request, |reply| {
                    parse_group_choice(entry, min_groups, reply)
                })
                .await?;

            debug!(
                entry = selected.entry,
                "Kept {} of {} groups",
                chosen.len(),
                entry.responsibility_groups.len()
            );
            selected_groups.insert(selected.entry, chosen);
        }

        Ok(StageUpdate::Groups(selected_groups))
    }

    /// CONSTRUCT: one sentence per selected group. Malformed groups and unusable replies
    /// fall back to the group's original sentence; only transient exhaustion fails.
    pub(super) async fn construct(
        &self,
        resume: &ResumeDocument,
        job: &JobContext,
        state: &WorkflowState,
    ) -> Result<StageUpdate, PipelineError> {
        let mut constructed = IndexMap::new();

        for (entry_index, group_ids) in &state.selected_groups {
            let Some(entry) = resume.work.get(*entry_index) else {
                continue;
            };
            let role = json!({
                "title": state.title_of(*entry_index),
                "company": entry.primary_company(),
            });

            let mut previous: Vec<String> = Vec::new();
            for group_id in group_ids {
                let Some(group) = entry.responsibility_groups.get(group_id) else {
                    continue;
                };
                let sentence = self
                    .construct_sentence(job, state, &role, group_id, group, &previous)
                    .await?;
                previous.push(sentence.clone());
                constructed.insert(SentenceKey::new(*entry_index, group_id.clone()), sentence);
            }
        }

        info!("Constructed {} sentences", constructed.len());
        Ok(StageUpdate::Constructed(constructed))
    }

    async fn construct_sentence(
        &self,
        job: &JobContext,
        state: &WorkflowState,
        role: &Value,
        group_id: &str,
        group: &ResponsibilityGroup,
        previous: &[String],
    ) -> Result<String, PipelineError> {
        if let Err(defects) = template::validate_group(group) {
            warn!(
                group = group_id,
                "Group has {} template defect(s); using its original sentence",
                defects.len()
            );
            return Ok(template::fallback(group));
        }

        let system = system_prompt(CONSTRUCT_ROLE, JSON_ONLY_SYSTEM);
        let request = StageRequest {
            stage: Stage::Construct,
            role: &system,
            instructions: format!("{CONSTRUCT_PROMPT}\n\n{GROUNDING_INSTRUCTION}"),
            context: json!({
                "stage": Stage::Construct,
                "job_description": job.description,
                "company_research": research_content(state),
                "role": role,
                "group_id": group_id,
                "original_sentence": group.original_sentence,
                "base_sentences": group.base_sentences,
                "variables": group.variables,
                "previous_sentences": previous,
            }),
        };

        let outcome = self
            .settings
            .retry
            .generate(self.capability.as_ref(), &request, |reply| {
                parse_construction(group, reply)
            })
            .await;

        match outcome {
            Ok(Ok(sentence)) => Ok(sentence),
            Ok(Err(e)) => {
                warn!(group = group_id, "Chosen template did not resolve ({e}); using original sentence");
                Ok(template::fallback(group))
            }
            Err(PipelineError::StageExhausted {
                last_error: GenerationError::InvalidResponse(reason),
                ..
            }) => {
                warn!(group = group_id, "No usable construction ({reason}); using original sentence");
                Ok(template::fallback(group))
            }
            Err(e) => Err(e),
        }
    }

    /// REVIEW: each constructed sentence is replaced by its rewrite.
    pub(super) async fn review(
        &self,
        job: &JobContext,
        state: &WorkflowState,
    ) -> Result<StageUpdate, PipelineError> {
        let system = system_prompt(REVIEW_ROLE, PLAIN_TEXT_SYSTEM);
        let mut reviewed = IndexMap::new();

        for (key, sentence) in &state.constructed_sentences {
            let request = StageRequest {
                stage: Stage::Review,
                role: &system,
                instructions: REVIEW_PROMPT.to_string(),
                context: json!({
                    "stage": Stage::Review,
                    "sentence": sentence,
                    "title": state.title_of(key.entry),
                    "job_description": job.description,
                }),
            };
            let text = self
                .settings
                .retry
                .generate(self.capability.as_ref(), &request, non_empty_text)
                .await?;
            reviewed.insert(key.clone(), text);
        }

        Ok(StageUpdate::Reviewed(reviewed))
    }

    /// SUMMARIZE: one summary over the final selected content.
    pub(super) async fn summarize(
        &self,
        resume: &ResumeDocument,
        job: &JobContext,
        state: &WorkflowState,
    ) -> Result<StageUpdate, PipelineError> {
        let roles: Vec<Value> = state
            .selected_entries
            .iter()
            .filter_map(|selected| {
                let entry = resume.work.get(selected.entry)?;
                let sentences: Vec<&str> = state
                    .selected_groups
                    .get(&selected.entry)
                    .into_iter()
                    .flatten()
                    .filter_map(|group| {
                        state.final_sentence(&SentenceKey::new(selected.entry, group.clone()))
                    })
                    .collect();
                Some(json!({
                    "title": selected.title,
                    "company": entry.primary_company(),
                    "start_date": entry.start_date,
                    "end_date": entry.end_date,
                    "sentences": sentences,
                }))
            })
            .collect();

        let system = system_prompt(SUMMARIZE_ROLE, PLAIN_TEXT_SYSTEM);
        let request = StageRequest {
            stage: Stage::Summarize,
            role: &system,
            instructions: format!("{SUMMARIZE_PROMPT}\n\n{GROUNDING_INSTRUCTION}"),
            context: json!({
                "stage": Stage::Summarize,
                "job_description": job.description,
                "company_research": research_content(state),
                "candidate": resume.basics.name,
                "roles": roles,
            }),
        };

        let summary = self
            .settings
            .retry
            .generate(self.capability.as_ref(), &request, non_empty_text)
            .await?;
        Ok(StageUpdate::Summary(summary))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reply validation
// ────────────────────────────────────────────────────────────────────────────

fn non_empty_text(reply: &str) -> Result<String, String> {
    let text = clean_text_reply(reply);
    if text.is_empty() {
        Err("reply is empty".to_string())
    } else {
        Ok(text)
    }
}

fn parse_company_name(reply: &str) -> Result<Option<String>, String> {
    let name = non_empty_text(reply)?;
    if name.eq_ignore_ascii_case(UNKNOWN_COMPANY) {
        Ok(None)
    } else {
        Ok(Some(name))
    }
}

fn parse_role_choice(entry: &WorkEntry, reply: &str) -> Result<Option<String>, String> {
    let reply: RoleReply = parse_json_reply(reply)
        .map_err(|e| format!("reply is not the expected JSON object: {e}"))?;
    if !reply.include {
        return Ok(None);
    }

    let title = reply.title.unwrap_or_default().trim().to_string();
    if entry.title_variants.contains(&title) {
        Ok(Some(title))
    } else {
        Err(format!(
            "title '{title}' is not one of the declared variants {:?}",
            entry.title_variants
        ))
    }
}

fn parse_group_choice(
    entry: &WorkEntry,
    min_groups: usize,
    reply: &str,
) -> Result<Vec<GroupId>, String> {
    let reply: GroupReply = parse_json_reply(reply)
        .map_err(|e| format!("reply is not the expected JSON object: {e}"))?;

    let mut chosen: HashSet<&str> = HashSet::new();
    for id in &reply.groups {
        let id = id.trim();
        if !entry.responsibility_groups.contains_key(id) {
            return Err(format!("unknown group '{id}'"));
        }
        if !chosen.insert(id) {
            return Err(format!("group '{id}' selected more than once"));
        }
    }
    if chosen.len() < min_groups {
        return Err(format!(
            "selected {} group(s), at least {min_groups} required",
            chosen.len()
        ));
    }

    Ok(entry
        .responsibility_groups
        .keys()
        .filter(|id| chosen.contains(id.as_str()))
        .cloned()
        .collect())
}

/// Outer error rejects the reply; inner error means the reply was well-formed but the
/// template could not be resolved with it.
fn parse_construction(
    group: &ResponsibilityGroup,
    reply: &str,
) -> Result<Result<String, ResolveError>, String> {
    let reply: ConstructReply = parse_json_reply(reply)
        .map_err(|e| format!("reply is not the expected JSON object: {e}"))?;
    let Some(template) = group.base_sentences.get(reply.template_index) else {
        return Err(format!(
            "template_index {} is out of range, {} template(s) declared",
            reply.template_index,
            group.base_sentences.len()
        ));
    };
    Ok(template::resolve(template, &reply.values))
}

/// At least 60% of an entry's groups, rounded up.
fn minimum_groups(total: usize) -> usize {
    (total * 3).div_ceil(5)
}

fn research_content(state: &WorkflowState) -> Value {
    state
        .company_research
        .as_ref()
        .map_or(Value::Null, |record| Value::String(record.content.clone()))
}

fn company_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"at\s+([A-Z][A-Za-z0-9\s&.,]+?)(?:\s+is|\s+are|\s+we|\s*[,.])",
            r"([A-Z][A-Za-z0-9\s&.,]+?)\s+is\s+looking\s+for",
            r"About\s+([A-Z][A-Za-z0-9\s&.,]+?)[\s+:]",
            r"Join\s+([A-Z][A-Za-z0-9\s&.,]+?)[\s+,.]",
            r"with\s+([A-Z][A-Za-z0-9\s&.,]+?)[\s+,.]",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// First company name found by the fallback patterns, tried in priority order.
fn company_from_patterns(description: &str) -> Option<String> {
    company_patterns().iter().find_map(|pattern| {
        pattern
            .captures(description)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
    })
}
