use serde_json::{json, Value};
use std::time::Duration;
use stepcore::{
    Action, ActionType, EngineError, ExecutionConstants, ExecutionState, FailureKind, FlowRunResponse,
    RetryPolicy, StepExecutionPath, StepKind, StepOutput, StepStatus, StopResponse, Verdict,
    VerdictResponse,
};

fn succeeded(output: Value) -> StepOutput {
    StepOutput::init(StepKind::Code, Value::Null)
        .with_status(StepStatus::Succeeded)
        .with_output(output)
}

#[test]
fn test_upsert_leaves_earlier_snapshot_untouched() {
    let first = ExecutionState::new().upsert_step("a", succeeded(json!(1)));
    let second = first.clone().upsert_step("b", succeeded(json!(2)));

    assert_eq!(first.steps().len(), 1);
    assert_eq!(second.steps().len(), 2);
    assert!(first.get_step_output("b").is_none());
    assert_eq!(second.get_step_output("a").unwrap().output, Some(json!(1)));
}

#[test]
fn test_steps_keep_insertion_order() {
    let state = ExecutionState::new()
        .upsert_step("zeta", succeeded(json!(1)))
        .upsert_step("alpha", succeeded(json!(2)))
        .upsert_step("zeta", succeeded(json!(3)));

    let names: Vec<&str> = state.steps().keys().map(String::as_str).collect();
    assert_eq!(names, vec!["zeta", "alpha"]);
    assert_eq!(state.get_step_output("zeta").unwrap().output, Some(json!(3)));
}

#[test]
fn test_path_display_parse_and_addresses() {
    let path = StepExecutionPath::empty()
        .loop_iteration("outer", 0)
        .loop_iteration("inner", 2);

    assert_eq!(path.to_string(), "outer,0.inner,2");
    assert_eq!(StepExecutionPath::parse("outer,0.inner,2"), Some(path.clone()));
    assert_eq!(StepExecutionPath::parse(""), Some(StepExecutionPath::empty()));
    assert_eq!(StepExecutionPath::parse("outer"), None);
    assert_eq!(path.remove_last().to_string(), "outer,0");

    let outer = StepExecutionPath::empty().loop_iteration("outer", 0);
    assert!(outer.addresses("outer,0"));
    assert!(outer.addresses("outer,0.inner,2"));
    assert!(!outer.addresses("outer,01"));
    assert!(!outer.addresses("outer,1"));
}

#[test]
fn test_steps_inside_iterations_follow_current_path() {
    let loop_output = StepOutput::init(StepKind::LoopOnItems, Value::Null)
        .with_item_and_index(json!("x"), 1)
        .ensure_iteration(1);
    let state = ExecutionState::new()
        .upsert_step("trigger", succeeded(json!({})))
        .upsert_step("each", loop_output)
        .set_current_path(StepExecutionPath::empty().loop_iteration("each", 1))
        .upsert_step("inner", succeeded(json!("in loop")));

    assert_eq!(state.get_step_output("inner").unwrap().output, Some(json!("in loop")));
    assert!(state.steps().get("inner").is_none());
    assert_eq!(state.steps()["each"].iterations[1]["inner"].output, Some(json!("in loop")));

    let visible: Vec<&str> = state.steps_in_scope().into_iter().map(|(name, _)| name).collect();
    assert_eq!(visible, vec!["trigger", "each", "inner"]);

    let top = state.set_current_path(StepExecutionPath::empty());
    assert!(top.get_step_output("inner").is_none());
    assert_eq!(top.iteration_steps("each", 1).unwrap().len(), 1);
    assert!(top.iteration_steps("each", 0).unwrap().is_empty());
}

#[test]
fn test_completion_is_terminal_status() {
    let state = ExecutionState::new()
        .upsert_step("done", succeeded(json!(null)))
        .upsert_step("waiting", StepOutput::init(StepKind::Block, Value::Null).with_status(StepStatus::Paused))
        .upsert_step(
            "broken",
            StepOutput::init(StepKind::Code, Value::Null)
                .with_status(StepStatus::Failed)
                .with_error("boom"),
        );

    assert!(state.is_completed("done"));
    assert!(state.is_completed("broken"));
    assert!(!state.is_completed("waiting"));
    assert!(state.is_paused("waiting"));
    assert!(!state.is_completed("absent"));
    assert_eq!(state.get_step_output("broken").unwrap().error_message.as_deref(), Some("boom"));
}

#[test]
fn test_tags_are_deduplicated_and_tasks_counted() {
    let state = ExecutionState::new()
        .add_tags(["vip", "eu"])
        .add_tags(vec!["vip".to_string()])
        .increase_task()
        .increase_tasks(2);

    assert_eq!(state.tags(), ["vip".to_string(), "eu".to_string()]);
    assert_eq!(state.task_count(), 3);
    assert!(state.is_running());
}

#[test]
fn test_response_maps_verdicts() {
    let paused = ExecutionState::new().set_verdict(
        Verdict::Paused,
        Some(VerdictResponse::Paused {
            correlation_id: "req-1".to_string(),
            pause_metadata: json!({ "path": "" }),
        }),
    );
    let response = FlowRunResponse::from(&paused);
    assert_eq!(response.verdict, Verdict::Paused);
    assert_eq!(response.pause.as_ref().unwrap().execution_correlation_id, "req-1");
    assert!(response.error.is_none());

    let failed = ExecutionState::new().fail(FailureKind::StepFailed, Some("step_1"), "boom");
    let response = FlowRunResponse::from(&failed);
    let error = response.error.unwrap();
    assert_eq!(error.kind, FailureKind::StepFailed);
    assert_eq!(error.step_name.as_deref(), Some("step_1"));

    let stopped = ExecutionState::new().set_verdict(
        Verdict::Stopped,
        Some(VerdictResponse::Stopped {
            response: StopResponse {
                status: 204,
                ..Default::default()
            },
        }),
    );
    let json = serde_json::to_value(FlowRunResponse::from(&stopped)).unwrap();
    assert_eq!(json["verdict"], json!("STOPPED"));
    assert_eq!(json["stopResponse"]["status"], json!(204));
    assert!(json.get("pause").is_none());
}

#[test]
fn test_state_survives_serialization() {
    let state = ExecutionState::new()
        .upsert_step("trigger", succeeded(json!({ "a": 1 })))
        .add_tags(["t"])
        .increase_task()
        .set_pause_id("p-1");

    let restored: ExecutionState = serde_json::from_value(serde_json::to_value(&state).unwrap()).unwrap();

    assert_eq!(restored.steps(), state.steps());
    assert_eq!(restored.tags(), state.tags());
    assert_eq!(restored.task_count(), 1);
    assert_eq!(restored.pause_id(), Some("p-1"));
}

#[test]
fn test_action_graph_parsing() {
    let action = Action::from_json(json!({
        "name": "each",
        "type": "LOOP_ON_ITEMS",
        "settings": { "items": "{{trigger.list}}" },
        "firstLoopAction": { "name": "inner", "type": "PIECE", "settings": {
            "blockName": "http", "blockVersion": "0.1.0", "actionName": "send_request"
        }},
        "nextAction": { "name": "after", "type": "CODE", "settings": {} }
    }))
    .unwrap();

    assert_eq!(action.action_type(), ActionType::LoopOnItems);
    assert_eq!(action.find("inner").unwrap().action_type(), ActionType::Block);
    assert_eq!(action.find("after").unwrap().name, "after");
    assert!(action.detached().next_action.is_none());

    let unknown = Action::from_json(json!({ "name": "x", "type": "TELEPORT" }));
    assert!(matches!(unknown, Err(EngineError::UnsupportedActionType(t)) if t == "TELEPORT"));
}

#[test]
fn test_retry_delay_grows_exponentially() {
    let policy = RetryPolicy {
        max_attempts: 4,
        exponential: 3,
        base_interval_ms: 100,
    };
    assert_eq!(policy.delay_for(1).as_millis(), 300);
    assert_eq!(policy.delay_for(2).as_millis(), 900);
}

#[test]
fn test_timeout_beyond_instant_range_has_no_deadline() {
    let constants = ExecutionConstants::new("run-1").with_timeout(Duration::from_secs(u64::MAX));
    assert!(constants.deadline().is_none());
    assert!(!constants.is_past_deadline());

    let expired = ExecutionConstants::new("run-1").with_timeout(Duration::ZERO);
    assert!(expired.deadline().is_some());
    assert!(expired.is_past_deadline());
}

#[test]
fn test_loop_names_with_path_separators_are_rejected() {
    for name in ["orders.each", "orders,1"] {
        let result = Action::from_json(json!({
            "name": name,
            "type": "LOOP_ON_ITEMS",
            "settings": { "items": [] }
        }));
        assert!(
            matches!(&result, Err(EngineError::Configuration(msg)) if msg.contains(name)),
            "{} should be rejected, got {:?}",
            name,
            result
        );
    }

    let code = Action::from_json(json!({ "name": "step.one", "type": "CODE", "settings": {} }));
    assert!(code.is_ok(), "only loop names form resume keys");
}
