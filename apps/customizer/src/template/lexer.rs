//! Lexer for modular base sentences.
//!
//! Grammar is deliberately closed: literal text and `{name}` placeholders only.
//! There is no escape sequence, so a literal brace is always a syntax error.

use serde::Serialize;
use thiserror::Error;

/// A single lexed piece of a base sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Literal(&'a str),
    /// Placeholder name, surrounding whitespace inside the braces trimmed.
    Placeholder(&'a str),
}

/// Structural defects in a base sentence, or in a group's use of its variables.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateSyntaxError {
    #[error("unmatched '{{' at byte {position}")]
    UnmatchedOpen { position: usize },

    #[error("unmatched '}}' at byte {position}")]
    UnmatchedClose { position: usize },

    #[error("empty placeholder name at byte {position}")]
    EmptyName { position: usize },

    #[error("base sentence {template_index} references undeclared variable '{name}'")]
    UndeclaredVariable { template_index: usize, name: String },

    #[error("base sentence {template_index}: {cause}")]
    InTemplate {
        template_index: usize,
        cause: Box<TemplateSyntaxError>,
    },
}

/// Splits a template into literal and placeholder tokens.
///
/// Fails on the first structural defect: a `{` with no closing `}` (or another `{`
/// before it), a stray `}`, or `{}` / `{  }`.
pub fn tokenize(template: &str) -> Result<Vec<Token<'_>>, TemplateSyntaxError> {
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut chars = template.char_indices();

    while let Some((position, c)) = chars.next() {
        match c {
            '{' => {
                if position > literal_start {
                    tokens.push(Token::Literal(&template[literal_start..position]));
                }

                let mut close = None;
                for (inner_position, inner) in chars.by_ref() {
                    match inner {
                        '}' => {
                            close = Some(inner_position);
                            break;
                        }
                        '{' => return Err(TemplateSyntaxError::UnmatchedOpen { position }),
                        _ => {}
                    }
                }
                let close = close.ok_or(TemplateSyntaxError::UnmatchedOpen { position })?;

                let name = template[position + 1..close].trim();
                if name.is_empty() {
                    return Err(TemplateSyntaxError::EmptyName { position });
                }
                tokens.push(Token::Placeholder(name));
                literal_start = close + 1;
            }
            '}' => return Err(TemplateSyntaxError::UnmatchedClose { position }),
            _ => {}
        }
    }

    if literal_start < template.len() {
        tokens.push(Token::Literal(&template[literal_start..]));
    }

    Ok(tokens)
}
