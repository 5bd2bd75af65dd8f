//! Reference resolver - turns a stage's bindings into concrete inputs
//!
//! Resolution never fails: a reference that cannot be satisfied becomes
//! `null` and a [`ResolutionDiagnostic`] explains why.

use crate::core::{Binding, Reference, ResolutionContext, StageResult};
use crate::stage::{StageInput, DRY_RUN_INPUT};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

/// Why a reference resolved to null
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Environment variable is not set
    MissingEnvVar { name: String },
    /// Config path stops at `segment`
    MissingConfigPath { segment: String },
    /// Stage has no result yet (not run, or not declared)
    StageNotFound { stage_id: String },
    /// Stage ran and failed
    StageFailed { stage_id: String },
    /// Stage output path stops at `segment`
    MissingOutputPath { segment: String },
    /// Placeholder could not be parsed
    Malformed { message: String },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::MissingEnvVar { name } => {
                write!(f, "environment variable '{}' is not set", name)
            }
            UnresolvedReason::MissingConfigPath { segment } => {
                write!(f, "config has no value at '{}'", segment)
            }
            UnresolvedReason::StageNotFound { stage_id } => {
                write!(f, "stage output not found for '{}'", stage_id)
            }
            UnresolvedReason::StageFailed { stage_id } => {
                write!(f, "stage '{}' failed", stage_id)
            }
            UnresolvedReason::MissingOutputPath { segment } => {
                write!(f, "stage output has no value at '{}'", segment)
            }
            UnresolvedReason::Malformed { message } => write!(f, "{}", message),
        }
    }
}

/// One binding that resolved to null
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionDiagnostic {
    /// Stage whose binding this is
    pub stage_id: String,
    /// Input name
    pub input: String,
    /// The expression as written
    pub reference: String,
    pub reason: UnresolvedReason,
}

impl fmt::Display for ResolutionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} <- {{{{ {} }}}}: {}",
            self.stage_id, self.input, self.reference, self.reason
        )
    }
}

/// Inputs for one stage plus whatever did not resolve
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    pub input: StageInput,
    pub diagnostics: Vec<ResolutionDiagnostic>,
}

/// Resolves bindings against a [`ResolutionContext`]
pub struct ReferenceResolver<'a> {
    context: ResolutionContext<'a>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(context: ResolutionContext<'a>) -> Self {
        Self { context }
    }

    /// Resolve one binding value
    ///
    /// Literals come back unchanged. `Err` carries the reason a reference
    /// resolved to null.
    pub fn resolve(&self, value: &Value) -> Result<Value, UnresolvedReason> {
        match Binding::parse(value) {
            Ok(Binding::Literal(literal)) => Ok(literal),
            Ok(Binding::Reference(reference)) => self.resolve_reference(&reference),
            Err(e) => Err(UnresolvedReason::Malformed {
                message: e.to_string(),
            }),
        }
    }

    /// Resolve a parsed reference
    pub fn resolve_reference(&self, reference: &Reference) -> Result<Value, UnresolvedReason> {
        match reference {
            Reference::Env { name } => self.resolve_env(name),
            Reference::Config { path } => walk_map(self.context.config, path)
                .cloned()
                .map_err(|segment| UnresolvedReason::MissingConfigPath { segment }),
            Reference::StageOutput { stage_id, path } => {
                match self.context.state.get(stage_id) {
                    None => Err(UnresolvedReason::StageNotFound {
                        stage_id: stage_id.clone(),
                    }),
                    Some(StageResult::Failure { .. }) => Err(UnresolvedReason::StageFailed {
                        stage_id: stage_id.clone(),
                    }),
                    Some(StageResult::Success { data }) => walk(data, path)
                        .cloned()
                        .map_err(|segment| UnresolvedReason::MissingOutputPath { segment }),
                }
            }
        }
    }

    fn resolve_env(&self, name: &str) -> Result<Value, UnresolvedReason> {
        let raw = self
            .context
            .env
            .var(name)
            .ok_or_else(|| UnresolvedReason::MissingEnvVar {
                name: name.to_string(),
            })?;

        if raw.eq_ignore_ascii_case("true") {
            Ok(Value::Bool(true))
        } else if raw.eq_ignore_ascii_case("false") {
            Ok(Value::Bool(false))
        } else {
            Ok(Value::String(raw))
        }
    }

    /// Resolve every binding of a stage, in declared order
    ///
    /// Unresolved bindings become null and are logged. `dry_run` is injected
    /// from the global flag when the stage does not bind it.
    pub fn resolve_bindings(&self, stage_id: &str, bindings: &IndexMap<String, Value>) -> ResolvedInputs {
        let mut values = Map::new();
        let mut diagnostics = Vec::new();

        for (input, binding) in bindings {
            let value = match self.resolve(binding) {
                Ok(value) => value,
                Err(reason) => {
                    let reference = binding
                        .as_str()
                        .and_then(crate::core::binding::placeholder_expression)
                        .map(|expr| expr.trim().to_string())
                        .unwrap_or_else(|| binding.to_string());
                    warn!(
                        stage = stage_id,
                        input = input.as_str(),
                        reference = reference.as_str(),
                        "Binding resolved to null: {}",
                        reason
                    );
                    diagnostics.push(ResolutionDiagnostic {
                        stage_id: stage_id.to_string(),
                        input: input.clone(),
                        reference,
                        reason,
                    });
                    Value::Null
                }
            };
            values.insert(input.clone(), value);
        }

        if !values.contains_key(DRY_RUN_INPUT) {
            values.insert(DRY_RUN_INPUT.to_string(), Value::Bool(self.context.dry_run));
        }

        ResolvedInputs {
            input: StageInput::new(values),
            diagnostics,
        }
    }
}

/// Walk `path` from `root`; mappings by key, arrays by numeric index
///
/// On a miss, returns the segment where the walk stopped.
fn walk<'v>(root: &'v Value, path: &[String]) -> Result<&'v Value, String> {
    let mut current = root;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| segment.clone())?;
    }
    Ok(current)
}

fn walk_map<'v>(root: &'v Map<String, Value>, path: &[String]) -> Result<&'v Value, String> {
    let Some((first, rest)) = path.split_first() else {
        return Err(String::new());
    };
    let head = root.get(first).ok_or_else(|| first.clone())?;
    walk(head, rest)
}
