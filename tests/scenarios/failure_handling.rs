//! Test: Failure Handling - failures are recorded and the run continues

use crate::helpers::*;
use leadflow::core::RunStatus;
use leadflow::execution::ExecutionEvent;
use serde_json::{json, Value};

/// A failing stage does not stop independent stages after it
#[tokio::test]
async fn test_failure_does_not_halt_run() {
    let yaml = r#"
name: "Test: Continue On Error"

stages:
  - id: "find"
    stageType: "Mock"
  - id: "enrich"
    stageType: "Mock"
    inputs:
      leads: "{{ find.output.leads }}"
  - id: "score"
    stageType: "Mock"
    inputs:
      leads: "{{ find.output.leads }}"
"#;

    let mocks = MockStages::new()
        .succeed("find", json!({"leads": ["A"]}))
        .fail("enrich", "enrichment API returned 503")
        .succeed("score", json!({"ranked": ["A"]}));

    let result = run_workflow(yaml, &mocks).await;

    // Every stage was invoked, in order
    assert_invocation_order(&result, &["find", "enrich", "score"]);

    assert_stage_succeeded(&result, "find");
    assert_stage_failed(&result, "enrich", "internal");
    assert_stage_succeeded(&result, "score");

    assert_run_status(&result, RunStatus::CompletedWithFailures);
    assert_eq!(result.report.failed, 1);
    assert_eq!(result.report.skipped, 0);
}

/// A stage that depends on a failed stage gets null plus a diagnostic
#[tokio::test]
async fn test_dependent_of_failed_stage_gets_null() {
    let yaml = r#"
name: "Test: Failed Dependency"

stages:
  - id: "enrich"
    stageType: "Mock"
  - id: "score"
    stageType: "Mock"
    inputs:
      leads: "{{ enrich.output.enriched_leads }}"
      limit: 5
"#;

    let mocks = MockStages::new().fail("enrich", "boom");
    let result = run_workflow(yaml, &mocks).await;

    // The dependent still runs, with the unresolved input set to null
    assert_invocation_order(&result, &["enrich", "score"]);
    assert_eq!(input_value(&result, "score", "leads"), Value::Null);
    assert_eq!(input_value(&result, "score", "limit"), json!(5));
    assert_eq!(
        result.unresolved_bindings(),
        vec![("score".to_string(), "leads".to_string())]
    );
}

/// Stages validate their own required inputs
#[tokio::test]
async fn test_missing_required_input_is_stage_failure() {
    let yaml = r#"
name: "Test: Required Inputs"

stages:
  - id: "enrich"
    stageType: "Mock"
  - id: "score"
    stageType: "Mock"
    requires: ["leads"]
    inputs:
      leads: "{{ enrich.output.missing_field }}"
  - id: "report"
    stageType: "Mock"
"#;

    let mocks = MockStages::new().succeed("enrich", json!({"enriched_leads": []}));
    let result = run_workflow(yaml, &mocks).await;

    assert_stage_failed(&result, "score", "missing_input");
    assert_stage_succeeded(&result, "report");

    let (_, message) = result.result_of("score").and_then(|r| r.error()).unwrap();
    assert!(message.contains("leads"));
}

/// A panic inside a stage becomes a failure entry
#[tokio::test]
async fn test_panicking_stage() {
    let yaml = r#"
name: "Test: Panic"

stages:
  - id: "fragile"
    stageType: "Mock"
  - id: "sturdy"
    stageType: "Mock"
"#;

    let mocks = MockStages::new()
        .panic("fragile", "index out of bounds")
        .succeed("sturdy", json!({"ok": true}));
    let result = run_workflow(yaml, &mocks).await;

    assert_stage_failed(&result, "fragile", "panic");
    assert_stage_succeeded(&result, "sturdy");
    assert_run_status(&result, RunStatus::CompletedWithFailures);
}

/// Even when every stage fails the run completes and leaves a snapshot
#[tokio::test]
async fn test_all_stages_fail() {
    let yaml = r#"
name: "Test: Everything Fails"

stages:
  - id: "a"
    stageType: "Mock"
  - id: "b"
    stageType: "Mock"
  - id: "c"
    stageType: "Mock"
"#;

    let mocks = MockStages::new()
        .fail("a", "a broke")
        .fail("b", "b broke")
        .fail("c", "c broke");
    let result = run_workflow(yaml, &mocks).await;

    assert_invocation_order(&result, &["a", "b", "c"]);
    assert_eq!(result.report.failed, 3);
    assert_eq!(result.snapshot.state.len(), 3);
    assert_eq!(result.snapshot.status, RunStatus::CompletedWithFailures);

    // Failure records carry the stage id and message
    match result.snapshot.state.get("b").unwrap() {
        leadflow::core::StageResult::Failure { stage_id, message, .. } => {
            assert_eq!(stage_id, "b");
            assert!(message.contains("b broke"));
        }
        other => panic!("Expected failure, got {:?}", other),
    }

    let failed_events = result
        .events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StageFailed { .. }))
        .count();
    assert_eq!(failed_events, 3);
}
