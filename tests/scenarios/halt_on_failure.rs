//! Test: Halt On Failure - the optional strict policy

use crate::helpers::*;
use leadflow::core::{RunStatus, RuntimeSettings};
use leadflow::execution::ExecutionEvent;
use serde_json::json;

const WORKFLOW: &str = r#"
name: "Test: Halt Policy"

stages:
  - id: "find"
    stageType: "Mock"
  - id: "enrich"
    stageType: "Mock"
  - id: "score"
    stageType: "Mock"
  - id: "send"
    stageType: "Mock"
"#;

fn mocks() -> MockStages {
    MockStages::new()
        .succeed("find", json!({"leads": ["A"]}))
        .fail("enrich", "provider down")
}

/// Default policy: keep going past failures
#[tokio::test]
async fn test_default_policy_continues() {
    let result = run_workflow(WORKFLOW, &mocks()).await;

    assert_invocation_order(&result, &["find", "enrich", "score", "send"]);
    assert_run_status(&result, RunStatus::CompletedWithFailures);
    assert!(result.snapshot.halted_at.is_none());
}

/// `halt_on_failure: true` in the definition stops after the first failure
#[tokio::test]
async fn test_definition_flag_halts() {
    let yaml = format!("halt_on_failure: true\n{}", WORKFLOW);
    let result = run_workflow(&yaml, &mocks()).await;

    assert_invocation_order(&result, &["find", "enrich"]);
    assert_not_invoked(&result, "score");
    assert_not_invoked(&result, "send");

    assert_run_status(&result, RunStatus::Halted);
    assert_eq!(result.report.halted_at.as_deref(), Some("enrich"));
    assert_eq!(result.report.skipped, 2);

    // The snapshot records where the run stopped
    assert_eq!(result.snapshot.halted_at.as_deref(), Some("enrich"));
    assert_eq!(result.snapshot.state.len(), 2);

    let halted = result.events.iter().find_map(|e| match e {
        ExecutionEvent::RunHalted { stage_id, skipped } => Some((stage_id.clone(), *skipped)),
        _ => None,
    });
    assert_eq!(halted, Some(("enrich".to_string(), 2)));
}

/// The runtime setting turns the policy on for any definition
#[tokio::test]
async fn test_settings_flag_halts() {
    let settings = RuntimeSettings::default().with_halt_on_failure(true);
    let result = run_workflow_with(WORKFLOW, &mocks(), env(&[]), settings).await;

    assert_invocation_order(&result, &["find", "enrich"]);
    assert_run_status(&result, RunStatus::Halted);
}

/// Halting only matters when something fails
#[tokio::test]
async fn test_halt_policy_without_failures() {
    let settings = RuntimeSettings::default().with_halt_on_failure(true);
    let result = run_workflow_with(WORKFLOW, &MockStages::new(), env(&[]), settings).await;

    assert_invocation_order(&result, &["find", "enrich", "score", "send"]);
    assert_run_status(&result, RunStatus::Completed);
}
