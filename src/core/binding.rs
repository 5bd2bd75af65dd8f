//! Placeholder bindings between stages
//!
//! A stage input is either a literal value or a `{{ expression }}`
//! placeholder. Expressions come in three shapes:
//!
//! - `stage_id.output.field[.field...]` - a field of an earlier stage's output
//! - `config.section[.field...]` - a value from the definition's `config` block
//! - `ENV_VAR_NAME` - a bare name, looked up in the process environment
//!
//! In stage references `output` is a marker, not a key: it is dropped
//! wherever it appears in the path, so `find.output.leads` and `find.leads`
//! read the same value. A payload field literally named `output` cannot be
//! addressed.
//!
//! Parsing only checks the shape of the expression. Whether the referenced
//! value exists is decided at resolution time, against runtime state.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// First token that routes a reference into the definition's config block
pub const CONFIG_NAMESPACE: &str = "config";

/// Segment marking "the success payload of this stage"
pub const OUTPUT_MARKER: &str = "output";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s{}.]+$").expect("segment pattern is valid"));

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("env placeholder pattern is valid")
});

/// Errors for placeholders whose expression cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
    #[error("placeholder '{0}' has an empty expression")]
    Empty(String),

    #[error("placeholder '{raw}' has an empty path segment")]
    EmptySegment { raw: String },

    #[error("placeholder '{raw}' has an invalid segment '{segment}'")]
    InvalidSegment { raw: String, segment: String },
}

/// A parsed placeholder expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `{{ NAME }}`
    Env { name: String },

    /// `{{ config.a.b }}`
    Config { path: Vec<String> },

    /// `{{ stage.output.a.b }}`; `path` excludes the `output` marker
    StageOutput { stage_id: String, path: Vec<String> },
}

impl Reference {
    /// Parse the inside of a placeholder (delimiters already stripped)
    pub fn parse(expression: &str) -> Result<Self, PlaceholderError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(PlaceholderError::Empty(expression.to_string()));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('.') {
            if segment.is_empty() {
                return Err(PlaceholderError::EmptySegment {
                    raw: trimmed.to_string(),
                });
            }
            if !SEGMENT.is_match(segment) {
                return Err(PlaceholderError::InvalidSegment {
                    raw: trimmed.to_string(),
                    segment: segment.to_string(),
                });
            }
            segments.push(segment.to_string());
        }

        if segments.len() == 1 {
            return Ok(Reference::Env {
                name: segments.remove(0),
            });
        }

        let head = segments.remove(0);
        if head == CONFIG_NAMESPACE {
            return Ok(Reference::Config { path: segments });
        }

        segments.retain(|segment| segment != OUTPUT_MARKER);

        Ok(Reference::StageOutput {
            stage_id: head,
            path: segments,
        })
    }

    /// The stage this reference reads from, if any
    pub fn referenced_stage(&self) -> Option<&str> {
        match self {
            Reference::StageOutput { stage_id, .. } => Some(stage_id),
            _ => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Env { name } => write!(f, "{}", name),
            Reference::Config { path } => write!(f, "{}.{}", CONFIG_NAMESPACE, path.join(".")),
            Reference::StageOutput { stage_id, path } if path.is_empty() => {
                write!(f, "{}.{}", stage_id, OUTPUT_MARKER)
            }
            Reference::StageOutput { stage_id, path } => {
                write!(f, "{}.{}.{}", stage_id, OUTPUT_MARKER, path.join("."))
            }
        }
    }
}

/// A stage input binding: a literal or a reference
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Literal(Value),
    Reference(Reference),
}

impl Binding {
    /// Classify a binding value from a stage's `inputs` block
    ///
    /// Only strings wrapped entirely in `{{ }}` are placeholders; every other
    /// value (including strings that merely contain braces) is a literal.
    pub fn parse(value: &Value) -> Result<Self, PlaceholderError> {
        match value.as_str().and_then(placeholder_expression) {
            Some(expression) => Reference::parse(expression).map(Binding::Reference),
            None => Ok(Binding::Literal(value.clone())),
        }
    }
}

/// Returns the expression between the delimiters if `text` is a placeholder
pub fn placeholder_expression(text: &str) -> Option<&str> {
    text.strip_prefix(OPEN)?.strip_suffix(CLOSE)
}

/// Replace `{{ NAME }}` occurrences anywhere inside string values
///
/// Used on stage settings (instructions, tool config) at build time, where
/// only environment values are available. Unknown names are left as-is.
pub fn substitute_env_placeholders<F>(value: &Value, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => Value::String(substitute_env_in_str(text, lookup)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_env_placeholders(item, lookup))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), substitute_env_placeholders(item, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// String form of [`substitute_env_placeholders`]
pub fn substitute_env_in_str<F>(text: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
