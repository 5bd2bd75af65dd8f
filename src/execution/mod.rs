//! Workflow execution: binding resolution and the orchestrator

pub mod engine;
pub mod resolver;

pub use engine::{EventHandler, ExecutionEvent, OrchestratorError, RunReport, WorkflowOrchestrator};
pub use resolver::{ReferenceResolver, ResolutionDiagnostic, ResolvedInputs, UnresolvedReason};
