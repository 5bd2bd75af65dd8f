//! leadflow - a declarative, sequential stage orchestrator for lead generation workflows

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod stage;

// Re-export commonly used types
pub use crate::core::{
    DefinitionError, Environment, MapEnvironment, ProcessEnvironment, RunStatus, RuntimeSettings,
    StageDescriptor, StageResult, WorkflowDefinition, WorkflowState,
};
pub use execution::{ExecutionEvent, OrchestratorError, RunReport, WorkflowOrchestrator};
pub use persistence::{FileSnapshotStore, InMemorySnapshotStore, RunSnapshot, SnapshotStore};
pub use stage::{StageError, StageExecutor, StageInput, StageKind, StageRegistry};
