//! Test: Binding Resolution - config, environment, and stage output references

use crate::helpers::*;
use leadflow::core::RuntimeSettings;
use leadflow::execution::{ExecutionEvent, UnresolvedReason};
use serde_json::{json, Value};

/// Nested config values resolve; absent paths resolve to null
#[tokio::test]
async fn test_config_references() {
    let yaml = r#"
name: "Test: Config References"
config:
  scoring:
    min_score: 70
    weights:
      - 0.6
      - 0.4
  outreach:
    tone: "friendly"

stages:
  - id: "score"
    stageType: "Mock"
    inputs:
      min_score: "{{ config.scoring.min_score }}"
      first_weight: "{{ config.scoring.weights.0 }}"
      tone: "{{config.outreach.tone}}"
      missing: "{{ config.scoring.max_score }}"
      too_deep: "{{ config.outreach.tone.formal }}"
"#;

    let result = run_workflow(yaml, &MockStages::new()).await;

    assert_eq!(input_value(&result, "score", "min_score"), json!(70));
    assert_eq!(input_value(&result, "score", "first_weight"), json!(0.6));
    assert_eq!(input_value(&result, "score", "tone"), json!("friendly"));
    assert_eq!(input_value(&result, "score", "missing"), Value::Null);
    assert_eq!(input_value(&result, "score", "too_deep"), Value::Null);

    // Unresolved config paths are diagnostics, not failures
    assert_stage_succeeded(&result, "score");
    assert_eq!(result.unresolved_bindings().len(), 2);
}

/// Bare names read the environment; true/false become booleans
#[tokio::test]
async fn test_env_references() {
    let yaml = r#"
name: "Test: Env References"

stages:
  - id: "send"
    stageType: "Mock"
    inputs:
      flag_upper: "{{ ENABLE_DRY_RUN }}"
      flag_lower: "{{SEND_FOR_REAL}}"
      sender: "{{ SENDER_EMAIL }}"
      missing: "{{ NOT_SET_ANYWHERE }}"
"#;

    let environment = env(&[
        ("ENABLE_DRY_RUN", "TRUE"),
        ("SEND_FOR_REAL", "false"),
        ("SENDER_EMAIL", "sales@example.com"),
    ]);
    let result = run_workflow_with(yaml, &MockStages::new(), environment, RuntimeSettings::default()).await;

    assert_eq!(input_value(&result, "send", "flag_upper"), json!(true));
    assert_eq!(input_value(&result, "send", "flag_lower"), json!(false));
    assert_eq!(input_value(&result, "send", "sender"), json!("sales@example.com"));
    assert_eq!(input_value(&result, "send", "missing"), Value::Null);

    let reasons: Vec<UnresolvedReason> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::BindingUnresolved { diagnostic } => Some(diagnostic.reason.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![UnresolvedReason::MissingEnvVar {
            name: "NOT_SET_ANYWHERE".to_string()
        }]
    );
}

/// The global dry-run flag is injected unless the stage binds it
#[tokio::test]
async fn test_dry_run_injection() {
    let yaml = r#"
name: "Test: Dry Run"

stages:
  - id: "implicit"
    stageType: "Mock"
  - id: "explicit"
    stageType: "Mock"
    inputs:
      dry_run: true
"#;

    let settings = RuntimeSettings::default().with_dry_run(false);
    let result = run_workflow_with(yaml, &MockStages::new(), env(&[]), settings).await;

    assert_eq!(input_value(&result, "implicit", "dry_run"), json!(false));
    assert_eq!(input_value(&result, "explicit", "dry_run"), json!(true));
}

/// A reference to a stage that runs later is null at resolution time
#[tokio::test]
async fn test_forward_reference_is_null() {
    let yaml = r#"
name: "Test: Forward Reference"

stages:
  - id: "early"
    stageType: "Mock"
    inputs:
      later_value: "{{ late.output.value }}"
  - id: "late"
    stageType: "Mock"
    inputs:
      value: 42
"#;

    let result = run_workflow(yaml, &MockStages::new()).await;

    assert_invocation_order(&result, &["early", "late"]);
    assert_eq!(input_value(&result, "early", "later_value"), Value::Null);

    let diagnostic = result
        .events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::BindingUnresolved { diagnostic } => Some(diagnostic.clone()),
            _ => None,
        })
        .expect("forward reference should produce a diagnostic");
    assert_eq!(diagnostic.reference, "late.output.value");
    assert_eq!(
        diagnostic.reason,
        UnresolvedReason::StageNotFound {
            stage_id: "late".to_string()
        }
    );
}

/// Literals pass through untouched, including strings with inner braces
#[tokio::test]
async fn test_literals_pass_through() {
    let yaml = r#"
name: "Test: Literals"

stages:
  - id: "compose"
    stageType: "Mock"
    inputs:
      subject: "Hello {{ first_name }}, quick question"
      limit: 25
      ratio: 0.5
      enabled: false
      tags: ["saas", "b2b"]
      nested:
        template: "{{ not.resolved.here }}"
"#;

    let result = run_workflow(yaml, &MockStages::new()).await;

    assert_eq!(
        input_value(&result, "compose", "subject"),
        json!("Hello {{ first_name }}, quick question")
    );
    assert_eq!(input_value(&result, "compose", "limit"), json!(25));
    assert_eq!(input_value(&result, "compose", "ratio"), json!(0.5));
    assert_eq!(input_value(&result, "compose", "enabled"), json!(false));
    assert_eq!(input_value(&result, "compose", "tags"), json!(["saas", "b2b"]));
    assert_eq!(
        input_value(&result, "compose", "nested"),
        json!({"template": "{{ not.resolved.here }}"})
    );
    assert!(result.unresolved_bindings().is_empty());
}

/// Out-of-range indexes and paths through scalars never yield partial values
#[tokio::test]
async fn test_stage_output_misses() {
    let yaml = r#"
name: "Test: Output Misses"

stages:
  - id: "rank"
    stageType: "Mock"
  - id: "notify"
    stageType: "Mock"
    inputs:
      out_of_range: "{{ rank.output.ranked.5 }}"
      not_an_index: "{{ rank.output.ranked.first }}"
      through_scalar: "{{ rank.output.count.value }}"
      count: "{{ rank.output.count }}"
"#;

    let mocks = MockStages::new().succeed("rank", json!({"ranked": ["B", "A"], "count": 2}));
    let result = run_workflow(yaml, &mocks).await;

    assert_eq!(input_value(&result, "notify", "out_of_range"), Value::Null);
    assert_eq!(input_value(&result, "notify", "not_an_index"), Value::Null);
    assert_eq!(input_value(&result, "notify", "through_scalar"), Value::Null);
    assert_eq!(input_value(&result, "notify", "count"), json!(2));
    assert_eq!(result.unresolved_bindings().len(), 3);
}

/// `output` is a marker wherever it sits in a stage reference
#[tokio::test]
async fn test_output_marker_inside_path() {
    let yaml = r#"
name: "Test: Output Marker"

stages:
  - id: "enrich"
    stageType: "Mock"
  - id: "write"
    stageType: "Mock"
    inputs:
      email: "{{ enrich.output.profile.output.email }}"
      company: "{{ enrich.profile.company }}"
"#;

    let mocks = MockStages::new().succeed(
        "enrich",
        json!({"profile": {"email": "ada@example.com", "company": "Acme"}}),
    );
    let result = run_workflow(yaml, &mocks).await;

    assert_eq!(input_value(&result, "write", "email"), json!("ada@example.com"));
    assert_eq!(input_value(&result, "write", "company"), json!("Acme"));
    assert!(result.unresolved_bindings().is_empty());
}
