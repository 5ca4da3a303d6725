// Instructions for each pipeline stage. The structured context (resume entry, job
// description, prior choices) is attached separately by the capability call.

/// Role for both RESEARCH calls.
pub const RESEARCH_ROLE: &str = "You are a company research analyst who prepares \
    concise briefings for resume writers.";

/// Extracts the hiring company's name from the start of a job description.
pub const EXTRACT_COMPANY_PROMPT: &str = "\
Extract the name of the hiring company from the job description excerpt in the context.
Reply with the company name only. If no company is named, reply with exactly: UNKNOWN";

/// Produces the research text stored in the cache.
pub const RESEARCH_PROMPT: &str = r#"Research the company named in the context and return a JSON object with this EXACT schema:
{
  "company_name": "Official company name",
  "description": "What the company does, two or three sentences",
  "industry": "Primary industry",
  "products": ["Main products or services"],
  "values": ["Stated values or culture signals"],
  "tech_stack": ["Technologies the company is known to use"]
}

Rules:
- Use only well-established public knowledge. Leave a list empty rather than guessing.
- Keep every string under 300 characters."#;

pub const ROLE_SELECT_ROLE: &str = "You are an experienced technical recruiter tailoring \
    a candidate's resume to one specific job.";

/// Decides inclusion and title for one work entry.
pub const ROLE_SELECT_PROMPT: &str = r#"Decide whether the work entry in the context belongs on a resume tailored to the job description, and which of its declared title variants fits the job best.

Return a JSON object with this EXACT schema:
{"include": true, "title": "One of title_variants, copied exactly"}

Rules:
- "title" MUST be copied character for character from "title_variants".
- Set "include" to false only when the entry adds nothing for this job; "title" may then be null.
- Prefer recent and relevant experience. Do not exclude an entry only because it is old."#;

pub const GROUP_SELECT_ROLE: &str = "You are an experienced technical recruiter choosing \
    which accomplishments to show for one role.";

/// Picks responsibility groups for one selected entry. Replace `{min_groups}` before sending.
pub const GROUP_SELECT_PROMPT: &str = r#"Choose which responsibility groups of the work entry in the context to show on the tailored resume, most relevant first.

Return a JSON object with this EXACT schema:
{"groups": ["group_id", "..."]}

Rules:
- Use only identifiers listed in "responsibility_groups". Never invent an identifier.
- Select at least {min_groups} distinct groups.
- Favor groups whose content matches the job description and the company research."#;

pub const CONSTRUCT_ROLE: &str = "You are a resume writer who builds each accomplishment \
    sentence from a fixed set of templates and options.";

/// Builds one sentence from a group's templates.
pub const CONSTRUCT_PROMPT: &str = r#"Build one resume sentence for the responsibility group in the context by choosing a template from "base_sentences" and a value for each of its placeholders.

Return a JSON object with this EXACT schema:
{"template_index": 0, "values": {"placeholder_name": "chosen value"}}

Rules:
- "template_index" is the zero-based position of the chosen template in "base_sentences".
- Provide a value for EVERY placeholder in the chosen template.
- Draw each value from that placeholder's options in "variables". You may combine two options when it reads naturally.
- Use the job description's terminology where an option matches it.
- Avoid repeating the leading action verbs of "previous_sentences"."#;

pub const REVIEW_ROLE: &str = "You are a meticulous resume editor.";

/// Polishes one constructed sentence.
pub const REVIEW_PROMPT: &str = "\
Rewrite the sentence in the context so it reads naturally as a resume bullet.
Fix grammar, tense, and flow. Keep every fact, tool, and number exactly as given.
Do not add a trailing period. Reply with the rewritten sentence only.";

pub const SUMMARIZE_ROLE: &str = "You are a resume writer who writes short professional \
    summaries.";

/// Writes the professional summary from the final content.
pub const SUMMARIZE_PROMPT: &str = "\
Write a professional summary of two to three sentences for the candidate in the context,
tailored to the job description and, when present, the company research.
Use only experience shown in the selected roles and sentences. Write in implied first
person without pronouns. Reply with the summary only.";

/// Appended when a reply is rejected. Replace `{reason}` before sending.
pub const AMENDMENT_TEMPLATE: &str = "\n\nYOUR PREVIOUS REPLY WAS REJECTED: {reason}\n\
    Reply again and follow the required format exactly.";
