//! Template Resolver: the closed `{placeholder}` grammar behind modular resume sentences.
//!
//! A responsibility group carries one or more base sentences and, per placeholder, a list
//! of declared options. This module checks that the two agree and merges a set of chosen
//! values into a final sentence. It never picks options itself: choosing is the job of
//! the CONSTRUCT stage, which hands the already-chosen values to [`resolve`].

pub mod lexer;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::models::resume::ResponsibilityGroup;

pub use lexer::TemplateSyntaxError;
use lexer::{tokenize, Token};

/// A template was resolved without a value for every placeholder it contains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no value chosen for placeholder(s): {}", missing.join(", "))]
pub struct MissingSubstitutionError {
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Syntax(#[from] TemplateSyntaxError),

    #[error(transparent)]
    MissingSubstitution(#[from] MissingSubstitutionError),
}

/// Returns the distinct placeholder names of a template in order of first appearance.
pub fn extract_placeholders(template: &str) -> Result<IndexSet<String>, TemplateSyntaxError> {
    Ok(tokenize(template)?
        .into_iter()
        .filter_map(|token| match token {
            Token::Placeholder(name) => Some(name.to_string()),
            Token::Literal(_) => None,
        })
        .collect())
}

/// Checks every base sentence of a group against its declared variables.
///
/// Collects all defects across all templates instead of stopping at the first one.
pub fn validate_group(group: &ResponsibilityGroup) -> Result<(), Vec<TemplateSyntaxError>> {
    let mut errors = Vec::new();

    for (template_index, template) in group.base_sentences.iter().enumerate() {
        match extract_placeholders(template) {
            Ok(names) => {
                for name in names {
                    if !group.variables.contains_key(&name) {
                        errors.push(TemplateSyntaxError::UndeclaredVariable {
                            template_index,
                            name,
                        });
                    }
                }
            }
            Err(cause) => errors.push(TemplateSyntaxError::InTemplate {
                template_index,
                cause: Box::new(cause),
            }),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Substitutes each placeholder with its chosen value.
///
/// Substitution is a single literal pass: a value that itself looks like `{x}` is
/// inserted verbatim. Unused entries in `chosen_values` are ignored. On a missing value
/// nothing is produced; the error lists every placeholder that had no value.
pub fn resolve(
    template: &str,
    chosen_values: &IndexMap<String, String>,
) -> Result<String, ResolveError> {
    let tokens = tokenize(template)?;

    let mut missing: Vec<String> = Vec::new();
    for token in &tokens {
        if let Token::Placeholder(name) = token {
            if !chosen_values.contains_key(*name) && !missing.iter().any(|m| m.as_str() == *name) {
                missing.push((*name).to_string());
            }
        }
    }
    if !missing.is_empty() {
        return Err(MissingSubstitutionError { missing }.into());
    }

    let mut sentence = String::with_capacity(template.len());
    for token in tokens {
        match token {
            Token::Literal(text) => sentence.push_str(text),
            Token::Placeholder(name) => {
                if let Some(value) = chosen_values.get(name) {
                    sentence.push_str(value);
                }
            }
        }
    }

    Ok(sentence)
}

/// The sentence to use when no template could be constructed for a group.
pub fn fallback(group: &ResponsibilityGroup) -> String {
    group.original_sentence.clone()
}
