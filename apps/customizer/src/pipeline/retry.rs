//! Bounded retry around a single capability call.
//!
//! Transient failures (`RateLimited`, `Timeout`) are retried with exponential backoff
//! until `max_retries` calls have failed that way. A reply that is malformed or fails the
//! stage's validation is retried once with the rejection reason appended to the
//! instructions; a second rejection exhausts the stage.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::llm_client::{GenerationError, TextGenerationCapability};
use crate::pipeline::errors::PipelineError;
use crate::pipeline::prompts::AMENDMENT_TEMPLATE;
use crate::pipeline::state::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on calls per request when every failure is transient.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bounds each individual capability call.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// One capability call as a stage wants it made.
#[derive(Debug, Clone)]
pub struct StageRequest<'a> {
    pub stage: Stage,
    pub role: &'a str,
    pub instructions: String,
    pub context: Value,
}

impl RetryPolicy {
    /// Delay before the next call after `failures` consecutive transient failures.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Calls the capability until `validate` accepts a reply or the budget is spent.
    pub async fn generate<T, F>(
        &self,
        capability: &dyn TextGenerationCapability,
        request: &StageRequest<'_>,
        validate: F,
    ) -> Result<T, PipelineError>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let max_transient = self.max_retries.max(1);
        let mut attempts = 0u32;
        let mut transient_failures = 0u32;
        let mut amended: Option<String> = None;

        loop {
            attempts += 1;
            let instructions = amended.as_deref().unwrap_or(&request.instructions);
            let call = capability.generate(request.role, instructions, &request.context);

            let outcome = match tokio::time::timeout(self.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(format!(
                    "no reply within {}s",
                    self.request_timeout.as_secs_f64()
                ))),
            };

            let error = match outcome {
                Ok(reply) => match validate(&reply) {
                    Ok(value) => return Ok(value),
                    Err(reason) => GenerationError::InvalidResponse(reason),
                },
                Err(e) => e,
            };

            if error.is_transient() {
                transient_failures += 1;
                if transient_failures >= max_transient {
                    return Err(exhausted(request.stage, attempts, error));
                }
                let delay = self.backoff_delay(transient_failures);
                warn!(
                    stage = %request.stage,
                    attempt = attempts,
                    "Transient failure ({error}); retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            } else {
                if amended.is_some() {
                    return Err(exhausted(request.stage, attempts, error));
                }
                warn!(
                    stage = %request.stage,
                    attempt = attempts,
                    "Rejected reply ({error}); retrying with amended instructions"
                );
                amended = Some(amend(&request.instructions, &error));
            }
        }
    }
}

fn amend(instructions: &str, error: &GenerationError) -> String {
    let reason = match error {
        GenerationError::InvalidResponse(reason)
        | GenerationError::RateLimited(reason)
        | GenerationError::Timeout(reason) => reason.as_str(),
    };
    format!(
        "{instructions}{}",
        AMENDMENT_TEMPLATE.replace("{reason}", reason)
    )
}

fn exhausted(stage: Stage, attempts: u32, last_error: GenerationError) -> PipelineError {
    PipelineError::StageExhausted {
        stage,
        attempts,
        last_error,
    }
}
