//! Execution state models

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a workflow builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorPhase {
    /// Definition loaded, no executors constructed yet
    Unbuilt,
    /// Every stage has an executor; ready to run
    Built,
    /// Stages are executing
    Running,
    /// Run finished (successfully or not); state is final
    Completed,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorPhase::Unbuilt => "unbuilt",
            OrchestratorPhase::Built => "built",
            OrchestratorPhase::Running => "running",
            OrchestratorPhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage ran and succeeded
    Completed,
    /// Every stage ran, at least one failed
    CompletedWithFailures,
    /// A failure stopped the run early (halt-on-failure policy)
    Halted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithFailures => "completed_with_failures",
            RunStatus::Halted => "halted",
        }
    }

    /// Whether any stage failed
    pub fn has_failures(&self) -> bool {
        matches!(self, RunStatus::CompletedWithFailures | RunStatus::Halted)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RunStatus::Completed),
            "completed_with_failures" => Ok(RunStatus::CompletedWithFailures),
            "halted" => Ok(RunStatus::Halted),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Outcome of one stage execution
///
/// Written into [`WorkflowState`] once, right after the stage returns, and
/// never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success {
        data: Value,
    },
    Failure {
        error_kind: String,
        message: String,
        stage_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl StageResult {
    pub fn success(data: Value) -> Self {
        StageResult::Success { data }
    }

    /// Build a failure stamped with the current time
    pub fn failure(
        stage_id: impl Into<String>,
        error_kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StageResult::Failure {
            error_kind: error_kind.into(),
            message: message.into(),
            stage_id: stage_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    /// The success payload, if any
    pub fn data(&self) -> Option<&Value> {
        match self {
            StageResult::Success { data } => Some(data),
            StageResult::Failure { .. } => None,
        }
    }

    /// `(error_kind, message)` for failures
    pub fn error(&self) -> Option<(&str, &str)> {
        match self {
            StageResult::Failure {
                error_kind,
                message,
                ..
            } => Some((error_kind, message)),
            StageResult::Success { .. } => None,
        }
    }
}

/// Run-scoped record of stage results, keyed by stage id in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowState {
    results: IndexMap<String, StageResult>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage result. Returns `false` (and keeps the first result) if
    /// the stage already has one: every stage id runs once per run.
    pub fn record(&mut self, stage_id: impl Into<String>, result: StageResult) -> bool {
        match self.results.entry(stage_id.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(result);
                true
            }
        }
    }

    pub fn get(&self, stage_id: &str) -> Option<&StageResult> {
        self.results.get(stage_id)
    }

    pub fn contains(&self, stage_id: &str) -> bool {
        self.results.contains_key(stage_id)
    }

    /// Stage ids in the order their results were recorded
    pub fn stage_ids(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageResult)> {
        self.results.iter().map(|(id, result)| (id.as_str(), result))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }
}
