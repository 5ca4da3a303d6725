//! Deterministic capabilities for pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::llm_client::{GenerationError, TextGenerationCapability};

type Script = Box<dyn Fn(&str, &str, &Value) -> Result<String, GenerationError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub role: String,
    pub instructions: String,
    pub context: Value,
}

impl RecordedCall {
    pub fn stage(&self) -> &str {
        self.context["stage"].as_str().unwrap_or_default()
    }
}

/// Answers every call through a closure and records what it was asked.
pub struct ScriptedCapability {
    script: Script,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCapability {
    pub fn new(
        script: impl Fn(&str, &str, &Value) -> Result<String, GenerationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replays fixed replies in order; calls past the end are rejected.
    pub fn sequence(replies: Vec<Result<String, GenerationError>>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::new(move |_, _, _| {
            replies.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(GenerationError::InvalidResponse(
                    "script exhausted".to_string(),
                ))
            })
        })
    }

    /// Sleeps before answering, for exercising the per-call timeout.
    pub fn delayed(delay: Duration, reply: &str) -> Self {
        let reply = reply.to_string();
        Self {
            delay: Some(delay),
            ..Self::new(move |_, _, _| Ok(reply.clone()))
        }
    }

    /// Picks the first declared option everywhere: first title, every group, template 0
    /// with each variable's first option, review returns the sentence untouched.
    pub fn first_choice() -> Self {
        Self::new(first_choice)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, stage: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.stage() == stage)
            .collect()
    }
}

#[async_trait]
impl TextGenerationCapability for ScriptedCapability {
    async fn generate(
        &self,
        role: &str,
        instructions: &str,
        context: &Value,
    ) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(RecordedCall {
            role: role.to_string(),
            instructions: instructions.to_string(),
            context: context.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(role, instructions, context)
    }
}

pub fn first_choice(
    _role: &str,
    _instructions: &str,
    context: &Value,
) -> Result<String, GenerationError> {
    let reply = match context["stage"].as_str().unwrap_or_default() {
        "RESEARCH" => match context["task"].as_str() {
            Some("extract_company") => "Acme".to_string(),
            _ => json!({
                "company_name": context["company_name"],
                "description": "Builds developer tools",
            })
            .to_string(),
        },
        "ROLE_SELECT" => json!({
            "include": true,
            "title": context["title_variants"][0],
        })
        .to_string(),
        "GROUP_SELECT" => {
            let groups: Vec<&String> = context["responsibility_groups"]
                .as_object()
                .map(|groups| groups.keys().collect())
                .unwrap_or_default();
            json!({ "groups": groups }).to_string()
        }
        "CONSTRUCT" => {
            let values: Map<String, Value> = context["variables"]
                .as_object()
                .map(|variables| {
                    variables
                        .iter()
                        .map(|(name, options)| (name.clone(), options[0].clone()))
                        .collect()
                })
                .unwrap_or_default();
            json!({ "template_index": 0, "values": values }).to_string()
        }
        "REVIEW" => context["sentence"].as_str().unwrap_or_default().to_string(),
        "SUMMARIZE" => "Engineer who builds tools".to_string(),
        other => {
            return Err(GenerationError::InvalidResponse(format!(
                "unexpected stage '{other}'"
            )))
        }
    };
    Ok(reply)
}
