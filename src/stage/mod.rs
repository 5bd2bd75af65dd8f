//! Stage executors
//!
//! A stage is one unit of work in a workflow. It receives its resolved
//! inputs and returns a [`StageResult`]; it never fails past that boundary.

pub mod error;
pub mod registry;
pub mod subprocess;

use crate::core::StageResult;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use error::StageError;
pub use registry::{StageFactory, StageKind, StageRegistry, COMMAND_STAGE_TYPE};
pub use subprocess::{SubprocessConfig, SubprocessStage};

/// Name of the input carrying the dry-run flag
pub const DRY_RUN_INPUT: &str = "dry_run";

/// Trait for stage execution - allows for different implementations
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Stage id from the definition
    fn id(&self) -> &str;

    /// Registry key this stage was constructed from
    fn stage_type(&self) -> &str;

    /// Inputs the stage cannot run without
    fn required_inputs(&self) -> &[String] {
        &[]
    }

    /// Run the stage against its resolved inputs
    async fn execute(&self, input: StageInput) -> StageResult;
}

/// Resolved inputs handed to a stage
///
/// An owned copy: nothing a stage does to it is visible to the orchestrator
/// or to later stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageInput {
    values: Map<String, Value>,
}

impl StageInput {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Value of an input, treating null as absent
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Value of an input the stage cannot do without
    pub fn require(&self, name: &str) -> Result<&Value, StageError> {
        self.get(name)
            .ok_or_else(|| StageError::MissingInput(name.to_string()))
    }

    /// Whether side effects should be simulated
    ///
    /// Missing or non-boolean values count as dry run.
    pub fn dry_run(&self) -> bool {
        self.get(DRY_RUN_INPUT)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}

impl From<Map<String, Value>> for StageInput {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}

/// Check that every required input is present and non-null
pub fn check_required_inputs(input: &StageInput, required: &[String]) -> Result<(), StageError> {
    for name in required {
        input.require(name)?;
    }
    Ok(())
}
