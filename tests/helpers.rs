//! Test utility functions for leadflow
#![allow(dead_code)]

use leadflow::core::{MapEnvironment, RunStatus, RuntimeSettings, StageDescriptor, StageResult, WorkflowDefinition};
use leadflow::execution::{ExecutionEvent, RunReport, WorkflowOrchestrator};
use leadflow::persistence::{InMemorySnapshotStore, RunSnapshot};
use leadflow::stage::{check_required_inputs, StageError, StageExecutor, StageInput, StageRegistry};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Stage type served by [`MockStages`]
pub const MOCK_STAGE_TYPE: &str = "Mock";

/// What a mock stage does when invoked
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return the given payload
    Succeed(Value),
    /// Return an internal failure with this message
    Fail(String),
    /// Panic with this message
    Panic(String),
    /// Return the resolved inputs as the payload
    Echo,
}

/// One recorded stage invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub stage_id: String,
    pub input: StageInput,
}

type Invocations = Arc<Mutex<Vec<Invocation>>>;

/// Mock stage that records every invocation
pub struct MockStage {
    id: String,
    behavior: MockBehavior,
    required: Vec<String>,
    invocations: Invocations,
}

#[async_trait]
impl StageExecutor for MockStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn stage_type(&self) -> &str {
        MOCK_STAGE_TYPE
    }

    fn required_inputs(&self) -> &[String] {
        &self.required
    }

    async fn execute(&self, input: StageInput) -> StageResult {
        self.invocations.lock().unwrap().push(Invocation {
            stage_id: self.id.clone(),
            input: input.clone(),
        });

        if let Err(e) = check_required_inputs(&input, &self.required) {
            return e.into_result(&self.id);
        }

        match &self.behavior {
            MockBehavior::Succeed(data) => StageResult::success(data.clone()),
            MockBehavior::Fail(message) => StageError::Internal(message.clone()).into_result(&self.id),
            MockBehavior::Panic(message) => panic!("{}", message),
            MockBehavior::Echo => StageResult::success(Value::Object(input.into_inner())),
        }
    }
}

/// Per-stage-id mock behaviors behind a single `Mock` stage type
#[derive(Clone, Default)]
pub struct MockStages {
    behaviors: HashMap<String, MockBehavior>,
    invocations: Invocations,
}

impl MockStages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(mut self, stage_id: &str, data: Value) -> Self {
        self.behaviors
            .insert(stage_id.to_string(), MockBehavior::Succeed(data));
        self
    }

    pub fn fail(mut self, stage_id: &str, message: &str) -> Self {
        self.behaviors
            .insert(stage_id.to_string(), MockBehavior::Fail(message.to_string()));
        self
    }

    pub fn panic(mut self, stage_id: &str, message: &str) -> Self {
        self.behaviors
            .insert(stage_id.to_string(), MockBehavior::Panic(message.to_string()));
        self
    }

    /// Registry with the `Mock` stage type; stages echo unless told otherwise
    pub fn registry(&self) -> StageRegistry {
        let behaviors = self.behaviors.clone();
        let invocations = self.invocations.clone();

        let mut registry = StageRegistry::new();
        registry.register(MOCK_STAGE_TYPE, move |descriptor: &StageDescriptor| {
            let behavior = behaviors
                .get(&descriptor.id)
                .cloned()
                .unwrap_or(MockBehavior::Echo);
            Ok(Arc::new(MockStage {
                id: descriptor.id.clone(),
                behavior,
                required: descriptor.requires.clone(),
                invocations: invocations.clone(),
            }) as Arc<dyn StageExecutor>)
        });
        registry
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

/// Result of running a workflow in a test
#[derive(Debug)]
pub struct WorkflowTestResult {
    pub report: RunReport,
    pub invocations: Vec<Invocation>,
    pub events: Vec<ExecutionEvent>,
    pub snapshot: RunSnapshot,
    pub duration_ms: u64,
}

impl WorkflowTestResult {
    /// Stage ids in the order they were invoked
    pub fn invocation_order(&self) -> Vec<String> {
        self.invocations.iter().map(|i| i.stage_id.clone()).collect()
    }

    /// The input a stage was invoked with
    pub fn input_of(&self, stage_id: &str) -> Option<&StageInput> {
        self.invocations
            .iter()
            .find(|i| i.stage_id == stage_id)
            .map(|i| &i.input)
    }

    pub fn result_of(&self, stage_id: &str) -> Option<&StageResult> {
        self.report.state.get(stage_id)
    }

    /// Unresolved-binding events, as `(stage, input)` pairs
    pub fn unresolved_bindings(&self) -> Vec<(String, String)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::BindingUnresolved { diagnostic } => {
                    Some((diagnostic.stage_id.clone(), diagnostic.input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Get a summary of the result
    pub fn summary(&self) -> String {
        format!(
            "{} - {} succeeded, {} failed, {} skipped ({}ms)",
            self.report.status,
            self.report.succeeded,
            self.report.failed,
            self.report.skipped,
            self.duration_ms
        )
    }
}

/// Build a map-backed environment from pairs
pub fn env(vars: &[(&str, &str)]) -> MapEnvironment {
    vars.iter().copied().collect()
}

/// Run a workflow with default settings and an empty environment
pub async fn run_workflow(yaml: &str, mocks: &MockStages) -> WorkflowTestResult {
    run_workflow_with(yaml, mocks, MapEnvironment::new(), RuntimeSettings::default()).await
}

/// Run a workflow with an explicit environment and settings
pub async fn run_workflow_with(
    yaml: &str,
    mocks: &MockStages,
    environment: MapEnvironment,
    settings: RuntimeSettings,
) -> WorkflowTestResult {
    let definition = WorkflowDefinition::from_yaml(yaml).expect("test workflow should parse");
    let store = Arc::new(InMemorySnapshotStore::new());

    let mut orchestrator = WorkflowOrchestrator::new(definition, mocks.registry())
        .with_environment(Arc::new(environment))
        .with_settings(settings)
        .with_snapshot_store(store.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    orchestrator.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let start = std::time::Instant::now();
    orchestrator.build().expect("test workflow should build");
    let report = orchestrator.run().await.expect("test workflow should run");
    let duration = start.elapsed();

    let snapshot = store.latest().await.expect("run should leave a snapshot");
    let events = events.lock().unwrap().clone();

    WorkflowTestResult {
        report,
        invocations: mocks.invocations(),
        events,
        snapshot,
        duration_ms: duration.as_millis() as u64,
    }
}

/// Assert that a stage succeeded; returns its payload
pub fn assert_stage_succeeded<'a>(result: &'a WorkflowTestResult, stage_id: &str) -> &'a Value {
    match result.result_of(stage_id) {
        Some(StageResult::Success { data }) => data,
        Some(other) => panic!(
            "Stage '{}' should have succeeded, got {:?}\n{}",
            stage_id,
            other,
            result.summary()
        ),
        None => panic!("Stage '{}' has no result\n{}", stage_id, result.summary()),
    }
}

/// Assert that a stage failed with the given error kind
pub fn assert_stage_failed(result: &WorkflowTestResult, stage_id: &str, expected_kind: &str) {
    match result.result_of(stage_id).and_then(StageResult::error) {
        Some((kind, _)) => assert_eq!(
            kind, expected_kind,
            "Stage '{}' failed with the wrong kind",
            stage_id
        ),
        None => panic!(
            "Stage '{}' should have failed, got {:?}\n{}",
            stage_id,
            result.result_of(stage_id),
            result.summary()
        ),
    }
}

/// Assert that a stage was never invoked
pub fn assert_not_invoked(result: &WorkflowTestResult, stage_id: &str) {
    assert!(
        result.input_of(stage_id).is_none(),
        "Stage '{}' should not have been invoked",
        stage_id
    );
    assert!(result.result_of(stage_id).is_none());
}

/// Assert the exact invocation order
pub fn assert_invocation_order(result: &WorkflowTestResult, expected: &[&str]) {
    let actual = result.invocation_order();
    assert_eq!(
        actual, expected,
        "Invocation order mismatch\n{}",
        result.summary()
    );
}

pub fn assert_run_status(result: &WorkflowTestResult, expected: RunStatus) {
    assert_eq!(
        result.report.status, expected,
        "Unexpected run status\n{}",
        result.summary()
    );
}

/// Input value as seen by a stage (null when absent)
pub fn input_value(result: &WorkflowTestResult, stage_id: &str, input: &str) -> Value {
    result
        .input_of(stage_id)
        .unwrap_or_else(|| panic!("Stage '{}' was not invoked", stage_id))
        .as_map()
        .get(input)
        .cloned()
        .unwrap_or(Value::Null)
}

/// Object literal helper for stage inputs
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("Expected an object, got {}", other),
    }
}
