//! Resume model: the typed, validated form of a modular YAML resume.
//!
//! Input arrives as loosely-shaped YAML (or the equivalent JSON). Loading parses it into
//! permissive raw structs and then validates exhaustively, so a caller gets every defect
//! in one `SchemaError` instead of fixing them one round-trip at a time.
//!
//! The loader also accepts the field names used by older modular resumes
//! (`title_variables`, `company`, `responsibilities_and_accomplishments`,
//! `modular_sentence`) and scalar-or-list forms for companies and base sentences.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use indexmap::IndexMap;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::template;

/// Identifier of a responsibility group, unique within its work entry.
pub type GroupId = String;

// ────────────────────────────────────────────────────────────────────────────
// Validated model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ResumeDocument {
    pub basics: Basics,
    /// Chronological order as authored. Selection never reorders entries.
    pub work: Vec<WorkEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Basics {
    pub name: String,
    /// Contact fields (email, phone, location, links) carried through untouched.
    #[serde(flatten)]
    pub contact: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkEntry {
    /// Candidate titles; exactly one is chosen during ROLE_SELECT.
    pub title_variants: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub company_variants: Vec<String>,
    pub location: String,
    /// Insertion order is the authored order and drives deterministic group ordering.
    pub responsibility_groups: IndexMap<GroupId, ResponsibilityGroup>,
}

impl WorkEntry {
    /// The first declared company name, used in prompts and reports.
    pub fn primary_company(&self) -> &str {
        self.company_variants
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponsibilityGroup {
    /// Always a valid sentence on its own; used whenever construction is skipped or fails.
    pub original_sentence: String,
    pub base_sentences: Vec<String>,
    pub variables: IndexMap<String, Vec<String>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// One defect found while loading a resume, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Error)]
#[error("resume failed validation with {} violation(s): {}", violations.len(), join_violations(violations))]
pub struct SchemaError {
    pub violations: Vec<SchemaViolation>,
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SchemaError {
    fn single(path: &str, message: impl Into<String>) -> Self {
        Self {
            violations: vec![SchemaViolation {
                path: path.to_string(),
                message: message.into(),
            }],
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loading
// ────────────────────────────────────────────────────────────────────────────

impl ResumeDocument {
    /// Parses YAML text and validates it into a `ResumeDocument`.
    pub fn load(raw: &str) -> Result<Self, SchemaError> {
        let parsed: RawResume = serde_yaml_ng::from_str(raw)
            .map_err(|e| SchemaError::single("$", format!("not a valid resume document: {e}")))?;
        parsed.validate()
    }

    /// Validates already-parsed YAML-shaped data (e.g. a JSON request body).
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let parsed: RawResume = serde_json::from_value(value)
            .map_err(|e| SchemaError::single("$", format!("not a valid resume document: {e}")))?;
        parsed.validate()
    }
}

#[derive(Debug, Deserialize)]
struct RawResume {
    basics: Option<RawBasics>,
    work: Option<Vec<RawWorkEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawBasics {
    name: Option<String>,
    #[serde(flatten)]
    contact: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawWorkEntry {
    #[serde(alias = "title_variables")]
    title_variants: Option<OneOrMany>,
    start_date: Option<Scalar>,
    end_date: Option<Scalar>,
    #[serde(alias = "company")]
    company_variants: Option<OneOrMany>,
    location: Option<String>,
    #[serde(alias = "responsibilities_and_accomplishments")]
    responsibility_groups: Option<OrderedEntries<RawGroup>>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    original_sentence: Option<String>,
    #[serde(alias = "modular_sentence")]
    base_sentences: Option<OneOrMany>,
    variables: Option<IndexMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Dates are often written unquoted (`2021`), so accept any scalar and keep its text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

/// A mapping kept as ordered pairs so duplicate keys survive parsing and can be reported.
#[derive(Debug)]
struct OrderedEntries<T>(Vec<(String, T)>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedEntries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = OrderedEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of group identifiers to responsibility groups")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Violations(Vec<SchemaViolation>);

impl Violations {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(SchemaViolation {
            path: path.into(),
            message: message.into(),
        });
    }

    fn required_text(&mut self, path: &str, value: Option<String>) -> String {
        match value {
            None => {
                self.push(path, "is required");
                String::new()
            }
            Some(text) if text.trim().is_empty() => {
                self.push(path, "must not be blank");
                String::new()
            }
            Some(text) => text.trim().to_string(),
        }
    }

    fn non_empty_list(&mut self, path: &str, value: Option<OneOrMany>) -> Vec<String> {
        let Some(value) = value else {
            self.push(path, "is required");
            return Vec::new();
        };
        let items = value.into_vec();
        if items.is_empty() {
            self.push(path, "must contain at least one value");
        }
        for (i, item) in items.iter().enumerate() {
            if item.trim().is_empty() {
                self.push(format!("{path}[{i}]"), "must not be blank");
            }
        }
        items.into_iter().map(|s| s.trim().to_string()).collect()
    }
}

impl RawResume {
    fn validate(self) -> Result<ResumeDocument, SchemaError> {
        let mut violations = Violations::default();

        let basics = match self.basics {
            None => {
                violations.push("basics", "is required");
                Basics {
                    name: String::new(),
                    contact: IndexMap::new(),
                }
            }
            Some(raw) => Basics {
                name: violations.required_text("basics.name", raw.name),
                contact: raw.contact,
            },
        };

        let work = match self.work {
            None => {
                violations.push("work", "is required");
                Vec::new()
            }
            Some(entries) if entries.is_empty() => {
                violations.push("work", "must contain at least one entry");
                Vec::new()
            }
            Some(entries) => entries
                .into_iter()
                .enumerate()
                .map(|(i, entry)| entry.validate(&format!("work[{i}]"), &mut violations))
                .collect(),
        };

        if violations.0.is_empty() {
            Ok(ResumeDocument { basics, work })
        } else {
            Err(SchemaError {
                violations: violations.0,
            })
        }
    }
}

impl RawWorkEntry {
    fn validate(self, path: &str, violations: &mut Violations) -> WorkEntry {
        let title_variants =
            violations.non_empty_list(&format!("{path}.title_variants"), self.title_variants);

        let mut company_variants =
            violations.non_empty_list(&format!("{path}.company_variants"), self.company_variants);
        let mut seen = HashSet::new();
        company_variants.retain(|c| seen.insert(c.clone()));

        let start_date = match self.start_date {
            Some(date) => date.into_text(),
            None => {
                violations.push(format!("{path}.start_date"), "is required");
                String::new()
            }
        };
        let end_date = self
            .end_date
            .map(Scalar::into_text)
            .unwrap_or_else(|| "Present".to_string());

        let mut responsibility_groups = IndexMap::new();
        match self.responsibility_groups {
            None => violations.push(format!("{path}.responsibility_groups"), "is required"),
            Some(OrderedEntries(entries)) => {
                for (id, raw) in entries {
                    let id = id.trim().to_string();
                    let group_path = format!("{path}.responsibility_groups.{id}");
                    if id.is_empty() {
                        violations.push(&group_path, "group identifier must not be blank");
                    }
                    let group = raw.validate(&group_path, violations);
                    if responsibility_groups.contains_key(&id) {
                        violations.push(&group_path, "duplicate group identifier");
                        continue;
                    }
                    responsibility_groups.insert(id, group);
                }
            }
        }

        WorkEntry {
            title_variants,
            start_date,
            end_date,
            company_variants,
            location: self.location.unwrap_or_default(),
            responsibility_groups,
        }
    }
}

impl RawGroup {
    fn validate(self, path: &str, violations: &mut Violations) -> ResponsibilityGroup {
        let original_sentence =
            violations.required_text(&format!("{path}.original_sentence"), self.original_sentence);
        let base_sentences =
            violations.non_empty_list(&format!("{path}.base_sentences"), self.base_sentences);

        let variables = self.variables.unwrap_or_default();
        for (name, options) in &variables {
            if options.is_empty() {
                violations.push(
                    format!("{path}.variables.{name}"),
                    "must contain at least one option",
                );
            }
        }

        let group = ResponsibilityGroup {
            original_sentence,
            base_sentences,
            variables,
        };

        if let Err(errors) = template::validate_group(&group) {
            for error in errors {
                violations.push(format!("{path}.base_sentences"), error.to_string());
            }
        }

        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULAR_RESUME: &str = r#"
basics:
  name: Jordan Reyes
  email: jordan@example.com
  location:
    city: Calgary
    province: AB
work:
  - title_variants: ["Systems Administrator", "IT Administrator"]
    company_variants: ["Northwind Traders"]
    start_date: Mar 2021
    end_date: Present
    location: Calgary, AB
    responsibility_groups:
      m365:
        original_sentence: Administered Microsoft 365 and Entra ID for 400 users
        base_sentences:
          - "{action} {microsoft} and {directory} for 400 users"
        variables:
          action: [Managed, Administered]
          microsoft: [Microsoft 365, M365]
          directory: [Entra ID, Azure AD]
      onboarding:
        original_sentence: Cut onboarding time from 18 days to 4 days
        base_sentences:
          - Cut onboarding time from 18 days to 4 days
"#;

    #[test]
    fn test_load_valid_modular_resume() {
        let doc = ResumeDocument::load(MODULAR_RESUME).unwrap();
        assert_eq!(doc.basics.name, "Jordan Reyes");
        assert!(doc.basics.contact.contains_key("email"));
        assert_eq!(doc.work.len(), 1);

        let entry = &doc.work[0];
        assert_eq!(entry.title_variants[0], "Systems Administrator");
        assert_eq!(entry.primary_company(), "Northwind Traders");
        let ids: Vec<_> = entry.responsibility_groups.keys().cloned().collect();
        assert_eq!(ids, vec!["m365", "onboarding"], "authored order is kept");
        assert!(entry.responsibility_groups["onboarding"].variables.is_empty());
    }

    #[test]
    fn test_load_accepts_legacy_field_names() {
        let yaml = r#"
basics:
  name: Jordan Reyes
work:
  - title_variables: ["Engineer", "Software Engineer"]
    company: Contoso
    start_date: 2019
    end_date: 2021
    location: Remote
    responsibilities_and_accomplishments:
      group_1:
        original_sentence: Built tools
        modular_sentence: "Built {thing}"
        variables:
          thing: [tools, systems]
"#;
        let doc = ResumeDocument::load(yaml).unwrap();
        let entry = &doc.work[0];
        assert_eq!(entry.company_variants, vec!["Contoso"]);
        assert_eq!(entry.start_date, "2019");
        assert_eq!(
            entry.responsibility_groups["group_1"].base_sentences,
            vec!["Built {thing}"]
        );
    }

    #[test]
    fn test_missing_end_date_defaults_to_present() {
        let value = serde_json::json!({
            "basics": {"name": "A"},
            "work": [{
                "title_variants": ["Engineer"],
                "company_variants": ["Contoso"],
                "start_date": "Jan 2020",
                "responsibility_groups": {}
            }]
        });
        let doc = ResumeDocument::from_value(value).unwrap();
        assert_eq!(doc.work[0].end_date, "Present");
    }

    #[test]
    fn test_collects_every_violation() {
        let value = serde_json::json!({
            "basics": {"email": "x@example.com"},
            "work": [{
                "title_variants": [],
                "company_variants": ["Contoso"],
                "responsibility_groups": {
                    "g1": {
                        "original_sentence": "Built tools",
                        "base_sentences": ["Built {thing} with {tool}"],
                        "variables": {"thing": []}
                    },
                    "g2": {
                        "base_sentences": []
                    }
                }
            }]
        });
        let err = ResumeDocument::from_value(value).unwrap_err();
        let paths: Vec<_> = err.violations.iter().map(|v| v.path.as_str()).collect();

        assert!(paths.contains(&"basics.name"));
        assert!(paths.contains(&"work[0].title_variants"));
        assert!(paths.contains(&"work[0].start_date"));
        assert!(paths.contains(&"work[0].responsibility_groups.g1.variables.thing"));
        assert!(paths.contains(&"work[0].responsibility_groups.g2.original_sentence"));
        assert!(paths.contains(&"work[0].responsibility_groups.g2.base_sentences"));

        let undeclared: Vec<_> = err
            .violations
            .iter()
            .filter(|v| v.path == "work[0].responsibility_groups.g1.base_sentences")
            .collect();
        assert_eq!(undeclared.len(), 1);
        assert!(undeclared[0].message.contains("'tool'"));
    }

    #[test]
    fn test_duplicate_group_identifier_is_rejected() {
        let yaml = r#"
basics: {name: A}
work:
  - title_variants: [Engineer]
    company_variants: [Contoso]
    start_date: 2020
    responsibility_groups:
      g1: {original_sentence: One, base_sentences: [One]}
      " g1 ": {original_sentence: Two, base_sentences: [Two]}
"#;
        let err = ResumeDocument::load(yaml).unwrap_err();
        assert_eq!(
            err.violations,
            vec![SchemaViolation {
                path: "work[0].responsibility_groups.g1".to_string(),
                message: "duplicate group identifier".to_string(),
            }]
        );
    }

    #[test]
    fn test_group_identifiers_are_trimmed() {
        let yaml = r#"
basics: {name: A}
work:
  - title_variants: [Engineer]
    company_variants: [Contoso]
    start_date: 2020
    responsibility_groups:
      "  g1 ": {original_sentence: One, base_sentences: [One]}
      g2: {original_sentence: Two, base_sentences: [Two]}
"#;
        let resume = ResumeDocument::load(yaml).unwrap();
        let ids: Vec<&str> = resume.work[0]
            .responsibility_groups
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(ids, vec!["g1", "g2"]);
    }

    #[test]
    fn test_missing_work_and_basics() {
        let err = ResumeDocument::load("{}").unwrap_err();
        let paths: Vec<_> = err.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["basics", "work"]);
    }

    #[test]
    fn test_empty_work_is_rejected() {
        let err = ResumeDocument::load("basics: {name: A}\nwork: []").unwrap_err();
        assert_eq!(err.violations[0].path, "work");
    }

    #[test]
    fn test_malformed_yaml_is_single_violation() {
        let err = ResumeDocument::load("basics: [unterminated").unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].path, "$");
    }

    #[test]
    fn test_company_variants_are_deduplicated() {
        let value = serde_json::json!({
            "basics": {"name": "A"},
            "work": [{
                "title_variants": ["Engineer"],
                "company_variants": ["Contoso", "Contoso", "Contoso Ltd"],
                "start_date": "2020",
                "responsibility_groups": {}
            }]
        });
        let doc = ResumeDocument::from_value(value).unwrap();
        assert_eq!(doc.work[0].company_variants, vec!["Contoso", "Contoso Ltd"]);
    }

    #[test]
    fn test_schema_error_display_lists_violations() {
        let err = ResumeDocument::load("{}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 violation(s)"));
        assert!(msg.contains("basics: is required"));
    }
}
