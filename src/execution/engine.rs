//! Workflow orchestrator - builds a definition into executors and runs them
//!
//! Stages run strictly in declared order, one at a time. A failed stage is
//! recorded and the run moves on (unless halt-on-failure is set); only a
//! broken definition or a failed snapshot write is an error.

use crate::core::{
    DefinitionError, Environment, OrchestratorPhase, ProcessEnvironment, ResolutionContext,
    RunStatus, RuntimeSettings, StageDescriptor, StageResult, WorkflowDefinition, WorkflowState,
};
use crate::execution::resolver::{ReferenceResolver, ResolutionDiagnostic};
use crate::persistence::{FileSnapshotStore, RunSnapshot, SnapshotLocation, SnapshotStore};
use crate::stage::{StageExecutor, StageInput, StageRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow_name: String,
        total_stages: usize,
    },
    StageStarted {
        stage_id: String,
        stage_type: String,
        index: usize,
        total: usize,
    },
    BindingUnresolved {
        diagnostic: ResolutionDiagnostic,
    },
    StageSucceeded {
        stage_id: String,
    },
    StageFailed {
        stage_id: String,
        error_kind: String,
        message: String,
    },
    RunHalted {
        stage_id: String,
        skipped: usize,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
    SnapshotSaved {
        location: SnapshotLocation,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Errors that stop the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("cannot {action} a workflow that is {actual} (expected {expected})")]
    InvalidPhase {
        action: &'static str,
        expected: OrchestratorPhase,
        actual: OrchestratorPhase,
    },

    #[error("failed to persist run snapshot: {0:#}")]
    Persistence(anyhow::Error),
}

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_stages: usize,
    pub succeeded: usize,
    pub failed: usize,

    /// Stages never invoked because the run halted
    pub skipped: usize,
    pub halted_at: Option<String>,
    pub snapshot: SnapshotLocation,
    pub state: WorkflowState,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

struct BuiltStage {
    descriptor: StageDescriptor,
    executor: Arc<dyn StageExecutor>,
}

/// Builds and runs one workflow definition
///
/// `Unbuilt -> Built -> Running -> Completed`; each transition happens once.
pub struct WorkflowOrchestrator {
    definition: WorkflowDefinition,
    registry: StageRegistry,
    env: Arc<dyn Environment>,
    settings: RuntimeSettings,
    store: Option<Arc<dyn SnapshotStore>>,
    phase: OrchestratorPhase,
    stages: Vec<BuiltStage>,
    state: WorkflowState,
    event_handlers: Vec<EventHandler>,
}

impl WorkflowOrchestrator {
    pub fn new(definition: WorkflowDefinition, registry: StageRegistry) -> Self {
        Self {
            definition,
            registry,
            env: Arc::new(ProcessEnvironment),
            settings: RuntimeSettings::default(),
            store: None,
            phase: OrchestratorPhase::Unbuilt,
            stages: Vec::new(),
            state: WorkflowState::new(),
            event_handlers: Vec::new(),
        }
    }

    /// Environment used for `{{ NAME }}` placeholders
    pub fn with_environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = env;
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Where the run snapshot goes; defaults to files in the output directory
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    pub fn phase(&self) -> OrchestratorPhase {
        self.phase
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Results recorded so far
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    fn halt_on_failure(&self) -> bool {
        self.settings.halt_on_failure || self.definition.halt_on_failure
    }

    fn expect_phase(&self, action: &'static str, expected: OrchestratorPhase) -> Result<(), OrchestratorError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidPhase {
                action,
                expected,
                actual: self.phase,
            })
        }
    }

    /// Validate the definition and construct one executor per stage
    ///
    /// Nothing runs here. On error the orchestrator stays `Unbuilt`.
    pub fn build(&mut self) -> Result<(), OrchestratorError> {
        self.expect_phase("build", OrchestratorPhase::Unbuilt)?;
        self.definition.validate()?;

        for warning in self.definition.lint() {
            warn!("{}", warning);
        }

        let mut stages = Vec::with_capacity(self.definition.stages.len());
        for descriptor in &self.definition.stages {
            let prepared = descriptor.with_env_substituted(self.env.as_ref());
            let executor = self.registry.construct(&prepared)?;
            debug!("Built stage '{}' ({})", prepared.id, prepared.stage_type);
            stages.push(BuiltStage {
                descriptor: prepared,
                executor,
            });
        }

        self.stages = stages;
        self.phase = OrchestratorPhase::Built;
        info!(
            "Workflow '{}' built with {} stages",
            self.definition.name,
            self.stages.len()
        );
        Ok(())
    }

    /// Run every stage in declared order, then persist the snapshot
    pub async fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        self.expect_phase("run", OrchestratorPhase::Built)?;
        self.phase = OrchestratorPhase::Running;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = self.stages.len();
        let halt_on_failure = self.halt_on_failure();

        info!("Starting workflow run: {} ({})", self.definition.name, run_id);
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            workflow_name: self.definition.name.clone(),
            total_stages: total,
        });

        let mut halted_at = None;
        for index in 0..total {
            let stage_id = self.stages[index].descriptor.id.clone();
            let executor = self.stages[index].executor.clone();

            let input = self.resolve_inputs(index);
            self.emit_event(ExecutionEvent::StageStarted {
                stage_id: stage_id.clone(),
                stage_type: executor.stage_type().to_string(),
                index,
                total,
            });

            let result = invoke(executor, &stage_id, input).await;
            match &result {
                StageResult::Success { .. } => {
                    info!("Stage '{}' succeeded", stage_id);
                    self.emit_event(ExecutionEvent::StageSucceeded {
                        stage_id: stage_id.clone(),
                    });
                }
                StageResult::Failure {
                    error_kind,
                    message,
                    ..
                } => {
                    error!("Stage '{}' failed ({}): {}", stage_id, error_kind, message);
                    self.emit_event(ExecutionEvent::StageFailed {
                        stage_id: stage_id.clone(),
                        error_kind: error_kind.clone(),
                        message: message.clone(),
                    });
                }
            }

            let failed = !result.is_success();
            if !self.state.record(stage_id.clone(), result) {
                warn!("Stage '{}' already has a result; keeping the first", stage_id);
            }

            if failed && halt_on_failure {
                let skipped = total - index - 1;
                warn!("Halting run after '{}' failed; {} stages skipped", stage_id, skipped);
                self.emit_event(ExecutionEvent::RunHalted {
                    stage_id: stage_id.clone(),
                    skipped,
                });
                halted_at = Some(stage_id);
                break;
            }
        }

        let completed_at = Utc::now();
        let succeeded = self.state.succeeded_count();
        let failed = self.state.failed_count();
        let status = if halted_at.is_some() {
            RunStatus::Halted
        } else if failed > 0 {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };

        self.phase = OrchestratorPhase::Completed;
        info!(
            "Workflow run finished: {} - {} ({} succeeded, {} failed)",
            self.definition.name, status, succeeded, failed
        );
        self.emit_event(ExecutionEvent::RunCompleted { run_id, status });

        let snapshot = RunSnapshot {
            run_id,
            workflow_name: self.definition.name.clone(),
            started_at,
            completed_at,
            status,
            halted_at: halted_at.clone(),
            state: self.state.clone(),
        };
        let store = self
            .store
            .clone()
            .unwrap_or_else(|| {
                Arc::new(FileSnapshotStore::new(&self.settings.output_dir)) as Arc<dyn SnapshotStore>
            });
        let location = store
            .save_snapshot(&snapshot)
            .await
            .map_err(OrchestratorError::Persistence)?;

        info!("Run snapshot saved to {}", location);
        self.emit_event(ExecutionEvent::SnapshotSaved {
            location: location.clone(),
        });

        Ok(RunReport {
            run_id,
            workflow_name: snapshot.workflow_name,
            status,
            started_at,
            completed_at,
            total_stages: total,
            succeeded,
            failed,
            skipped: total - self.state.len(),
            halted_at,
            snapshot: location,
            state: snapshot.state,
        })
    }

    /// Resolve the bindings of the stage at `index` against current state
    fn resolve_inputs(&self, index: usize) -> StageInput {
        let descriptor = &self.stages[index].descriptor;
        let context = ResolutionContext::new(
            &self.state,
            &self.definition.config,
            self.env.as_ref(),
            self.settings.dry_run,
        );
        let resolved = ReferenceResolver::new(context).resolve_bindings(&descriptor.id, &descriptor.inputs);

        for diagnostic in resolved.diagnostics {
            self.emit_event(ExecutionEvent::BindingUnresolved { diagnostic });
        }
        resolved.input
    }
}

/// Run one stage, turning a panic into a failure record
async fn invoke(executor: Arc<dyn StageExecutor>, stage_id: &str, input: StageInput) -> StageResult {
    let handle = tokio::spawn(async move { executor.execute(input).await });
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            StageResult::failure(stage_id, "panic", panic_message(e.into_panic()))
        }
        Err(e) => StageResult::failure(stage_id, "internal", e.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("stage panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("stage panicked: {}", message)
    } else {
        "stage panicked".to_string()
    }
}
