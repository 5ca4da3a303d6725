// Shared prompt fragments used across pipeline stages.
// Each stage's own instructions live in pipeline/prompts.rs.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// System prompt fragment for stages that answer with a single line of prose.
pub const PLAIN_TEXT_SYSTEM: &str = "You are a precise resume writing assistant. \
    Respond with the requested text only. \
    Do NOT wrap it in quotes. \
    Do NOT add labels, explanations, or alternatives.";

/// Instruction that keeps generated text tied to the candidate's declared experience.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Only use facts present in the resume context provided. \
    Do NOT infer, interpolate, or invent employers, tools, metrics, or outcomes. \
    If the context does not support a claim, omit it entirely.";

/// Builds a system prompt from a role description and a reply-format fragment.
pub fn system_prompt(role: &str, format: &str) -> String {
    format!("{role}\n\n{format}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_keeps_role_first() {
        let prompt = system_prompt("You are a recruiter.", JSON_ONLY_SYSTEM);
        assert!(prompt.starts_with("You are a recruiter."));
        assert!(prompt.ends_with("explanations or apologies."));
    }
}
