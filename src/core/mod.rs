//! Core domain models for workflows
//!
//! This module defines the workflow definition, the placeholder bindings
//! between stages, and the run-scoped state that stage results land in.

pub mod binding;
pub mod config;
pub mod context;
pub mod settings;
pub mod state;

pub use binding::{Binding, PlaceholderError, Reference};
pub use config::{
    CommandSpec, DefinitionError, DefinitionFormat, StageDescriptor, ToolConfig,
    WorkflowDefinition,
};
pub use context::{Environment, MapEnvironment, ProcessEnvironment, ResolutionContext};
pub use settings::RuntimeSettings;
pub use state::{OrchestratorPhase, RunStatus, StageResult, WorkflowState};
