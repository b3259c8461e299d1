mod common;

use common::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{ExecutionState, ResumePayload, StepStatus, Verdict, VerdictResponse};
use stepruntime::IterationRecord;

fn each(name: &str, items: Value, body: Value) -> Value {
    json!({
        "name": name,
        "type": "LOOP_ON_ITEMS",
        "settings": { "items": items },
        "firstLoopAction": body,
    })
}

async fn run(h: &Harness, flow: Value, payload: Value) -> ExecutionState {
    h.executor
        .execute(Some(build(flow)), trigger_state(payload), Arc::new(constants()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_loop_runs_every_item() {
    let h = harness(FakeCodeRunner::echo());
    let flow = chain(vec![
        each("each", json!("{{trigger.numbers}}"), code("double", json!({ "n": "{{each.item}}", "i": "{{each.index}}" }))),
        code("after", json!({ "last": "{{each.index}}" })),
    ]);

    let state = run(&h, flow, json!({ "numbers": [10, 20, 30] })).await;

    assert_eq!(state.verdict(), Verdict::Running);
    assert_eq!(h.code.calls_for("double"), 3);

    let each = state.get_step_output("each").unwrap();
    assert_eq!(each.status, StepStatus::Succeeded);
    assert_eq!(each.output, Some(json!({ "item": 30, "index": 3 })));
    assert_eq!(each.iterations.len(), 3);
    for (i, n) in [10, 20, 30].iter().enumerate() {
        assert_eq!(
            each.iterations[i]["double"].output,
            Some(json!({ "n": n, "i": i + 1 })),
            "iteration {}",
            i
        );
    }
    assert_eq!(state.get_step_output("after").unwrap().output, Some(json!({ "last": 3 })));
    assert_eq!(state.task_count(), 4);
    assert!(state.get_step_output("double").is_none(), "iteration steps stay inside the loop");
}

#[tokio::test]
async fn test_nested_loops_record_by_path() {
    let h = harness(FakeCodeRunner::echo());
    let flow = each(
        "outer",
        json!([[1, 2], [3]]),
        each("inner", json!("{{outer.item}}"), code("leaf", json!({ "v": "{{inner.item}}" }))),
    );

    let state = run(&h, flow, json!({})).await;

    assert_eq!(state.verdict(), Verdict::Running);
    assert_eq!(h.code.calls_for("leaf"), 3);
    let outer = state.get_step_output("outer").unwrap();
    assert_eq!(outer.iterations.len(), 2);
    let first_inner = &outer.iterations[0]["inner"];
    assert_eq!(first_inner.status, StepStatus::Succeeded);
    assert_eq!(first_inner.iterations[1]["leaf"].output, Some(json!({ "v": 2 })));
    assert_eq!(outer.iterations[1]["inner"].iterations[0]["leaf"].output, Some(json!({ "v": 3 })));
}

#[tokio::test]
async fn test_loop_rejects_non_list_items() {
    let h = harness(FakeCodeRunner::echo());
    let flow = each("each", json!("{{trigger.value}}"), code("body", json!({})));

    let state = run(&h, flow, json!({ "value": "abc" })).await;

    assert_eq!(state.verdict(), Verdict::Failed);
    assert!(h.code.calls().is_empty());
    assert_eq!(
        state.get_step_output("each").unwrap().error_message.as_deref(),
        Some("The items you have selected must be a list.")
    );
}

#[tokio::test]
async fn test_empty_list_completes_without_iterations() {
    let h = harness(FakeCodeRunner::echo());
    let flow = chain(vec![
        each("each", json!([]), code("body", json!({}))),
        code("after", json!({})),
    ]);

    let state = run(&h, flow, json!({})).await;

    assert_eq!(h.code.calls(), vec!["after"]);
    let each = state.get_step_output("each").unwrap();
    assert_eq!(each.status, StepStatus::Succeeded);
    assert!(each.iterations.is_empty());
}

#[tokio::test]
async fn test_failing_iteration_fails_loop() {
    let h = harness(FakeCodeRunner::echo());
    let flow = chain(vec![
        each("each", json!([1, 2, 3]), block("explode", "fail", json!({}))),
        code("after", json!({})),
    ]);

    let state = run(&h, flow, json!({})).await;

    assert_eq!(state.verdict(), Verdict::Failed);
    assert!(h.code.calls().is_empty());
    let each = state.get_step_output("each").unwrap();
    assert_eq!(each.status, StepStatus::Failed);
    assert_eq!(each.error_message.as_deref(), Some("integration exploded"));
    assert_eq!(each.iterations[0]["explode"].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_stopping_iteration_stops_run() {
    let h = harness(FakeCodeRunner::echo());
    let flow = each("each", json!(["x"]), block("respond", "stop", json!({})));

    let state = run(&h, flow, json!({})).await;

    assert_eq!(state.verdict(), Verdict::Stopped);
    assert_eq!(state.get_step_output("each").unwrap().status, StepStatus::Stopped);
    assert!(matches!(state.verdict_response(), Some(VerdictResponse::Stopped { .. })));
}

/// Loop over `["a", "b", "c"]` whose body waits for approval on items other than "a".
fn approval_flow() -> Value {
    let gate = json!({
        "name": "check",
        "type": "BRANCH",
        "settings": {
            "conditions": [[{ "operator": "TEXT_NOT_EXACTLY_MATCHES", "firstValue": "{{each.item}}", "secondValue": "a" }]]
        },
        "onSuccessAction": block("gate", "wait", json!({ "label": "{{each.item}}" })),
    });
    chain(vec![
        each("each", json!(["a", "b", "c"]), chain(vec![code("prepare", json!({ "item": "{{each.item}}" })), gate])),
        code("after", json!({ "done": "{{each.index}}" })),
    ])
}

fn resume_constants(path: &str, body: Value) -> stepcore::ExecutionConstants {
    constants().with_resume_payload(ResumePayload {
        query_params: HashMap::from([("path".to_string(), path.to_string())]),
        body,
        headers: HashMap::new(),
    })
}

fn paused_paths(state: &ExecutionState) -> Vec<String> {
    match state.verdict_response() {
        Some(VerdictResponse::Paused { pause_metadata, .. }) => pause_metadata["pausedIterations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["path"].as_str().unwrap().to_string())
            .collect(),
        other => panic!("expected a paused verdict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_paused_iterations_pause_loop_and_persist_records() {
    let h = harness(FakeCodeRunner::echo());

    let state = run(&h, approval_flow(), json!({})).await;

    assert_eq!(state.verdict(), Verdict::Paused);
    assert_eq!(h.code.calls_for("prepare"), 3);
    assert_eq!(h.code.calls_for("after"), 0);
    assert_eq!(paused_paths(&state), vec!["each,1", "each,2"]);

    let each = state.get_step_output("each").unwrap();
    assert_eq!(each.status, StepStatus::Paused);
    assert_eq!(each.iterations[0]["check"].output, Some(json!({ "condition": false })));
    assert_eq!(each.iterations[1]["gate"].status, StepStatus::Paused);

    let stored = h.store.snapshot().await;
    assert_eq!(stored.len(), 3);
    let record: IterationRecord = serde_json::from_value(stored["loops/run-1/each/1"].clone()).unwrap();
    assert!(record.paused);
    assert_eq!(record.item, json!("b"));
    assert_eq!(record.path, "each,1");
    assert_eq!(record.pause_metadata.unwrap()["metadata"], json!({ "waitingOn": "b" }));
    let first: IterationRecord = serde_json::from_value(stored["loops/run-1/each/0"].clone()).unwrap();
    assert!(!first.paused);
}

#[tokio::test]
async fn test_resume_continues_addressed_iteration_until_loop_completes() {
    let h = harness(FakeCodeRunner::echo());
    let flow = build(approval_flow());

    let paused = h
        .executor
        .execute(Some(flow.clone()), trigger_state(json!({})), Arc::new(constants()))
        .await
        .unwrap();
    let paused_tasks = paused.task_count();

    let once = h
        .executor
        .execute(
            Some(flow.clone()),
            paused.set_verdict(Verdict::Running, None),
            Arc::new(resume_constants("each,2", json!({ "ok": "c" })))
        )
        .await
        .unwrap();

    assert_eq!(once.verdict(), Verdict::Paused);
    assert_eq!(paused_paths(&once), vec!["each,1"]);
    let each = once.get_step_output("each").unwrap();
    assert_eq!(
        each.iterations[2]["gate"].output,
        Some(json!({ "resumedWith": { "ok": "c" } }))
    );
    assert_eq!(each.iterations[1]["gate"].status, StepStatus::Paused);
    assert_eq!(h.code.calls_for("prepare"), 3, "completed steps are not rerun");
    assert_eq!(once.task_count(), paused_tasks + 1);

    let done = h
        .executor
        .execute(
            Some(flow),
            once.set_verdict(Verdict::Running, None),
            Arc::new(resume_constants("each,1", json!({ "ok": "b" }))),
        )
        .await
        .unwrap();

    assert_eq!(done.verdict(), Verdict::Running);
    let each = done.get_step_output("each").unwrap();
    assert_eq!(each.status, StepStatus::Succeeded);
    assert_eq!(each.output, Some(json!({ "item": "c", "index": 3 })));
    assert_eq!(each.iterations[1]["gate"].status, StepStatus::Succeeded);
    assert_eq!(each.iterations[2]["gate"].status, StepStatus::Succeeded);
    assert_eq!(done.get_step_output("after").unwrap().output, Some(json!({ "done": 3 })));
    assert!(h.store.is_empty().await, "records are cleared once the loop completes");
}

#[tokio::test]
async fn test_resume_with_unknown_path_keeps_loop_paused() {
    let h = harness(FakeCodeRunner::echo());
    let flow = build(approval_flow());

    let paused = h
        .executor
        .execute(Some(flow.clone()), trigger_state(json!({})), Arc::new(constants()))
        .await
        .unwrap();
    let again = h
        .executor
        .execute(
            Some(flow),
            paused.set_verdict(Verdict::Running, None),
            Arc::new(resume_constants("other,0", Value::Null)),
        )
        .await
        .unwrap();

    assert_eq!(again.verdict(), Verdict::Paused);
    assert_eq!(paused_paths(&again), vec!["each,1", "each,2"]);
}

#[tokio::test]
async fn test_nested_loop_resumes_inner_frames_one_at_a_time() {
    let h = harness(FakeCodeRunner::echo());
    let flow = build(chain(vec![
        each(
            "outer",
            json!([["a"], ["b"]]),
            each("inner", json!("{{outer.item}}"), block("gate", "wait", json!({ "label": "{{inner.item}}" }))),
        ),
        code("after", json!({ "outer": "{{outer.index}}" })),
    ]));

    let paused = h
        .executor
        .execute(Some(flow.clone()), trigger_state(json!({})), Arc::new(constants()))
        .await
        .unwrap();

    assert_eq!(paused.verdict(), Verdict::Paused);
    assert_eq!(paused_paths(&paused), vec!["outer,0", "outer,1"]);
    let outer = paused.get_step_output("outer").unwrap();
    assert_eq!(outer.iterations[0]["inner"].status, StepStatus::Paused);
    assert_eq!(outer.iterations[1]["inner"].iterations[0]["gate"].status, StepStatus::Paused);

    let once = h
        .executor
        .execute(
            Some(flow.clone()),
            paused.set_verdict(Verdict::Running, None),
            Arc::new(resume_constants("outer,0.inner,0", json!({ "ok": "a" }))),
        )
        .await
        .unwrap();

    assert_eq!(once.verdict(), Verdict::Paused);
    assert_eq!(paused_paths(&once), vec!["outer,1"]);
    let outer = once.get_step_output("outer").unwrap();
    assert_eq!(outer.iterations[0]["inner"].status, StepStatus::Succeeded);
    assert_eq!(outer.iterations[1]["inner"].iterations[0]["gate"].status, StepStatus::Paused);
    assert_eq!(h.code.calls_for("after"), 0);

    let done = h
        .executor
        .execute(
            Some(flow),
            once.set_verdict(Verdict::Running, None),
            Arc::new(resume_constants("outer,1.inner,0", json!({ "ok": "b" }))),
        )
        .await
        .unwrap();

    assert_eq!(done.verdict(), Verdict::Running);
    let outer = done.get_step_output("outer").unwrap();
    assert_eq!(outer.status, StepStatus::Succeeded);
    assert_eq!(
        outer.iterations[0]["inner"].iterations[0]["gate"].output,
        Some(json!({ "resumedWith": { "ok": "a" } }))
    );
    assert_eq!(
        outer.iterations[1]["inner"].iterations[0]["gate"].output,
        Some(json!({ "resumedWith": { "ok": "b" } }))
    );
    assert_eq!(h.code.calls_for("after"), 1);
    assert!(h.store.is_empty().await, "nested records are cleared with the outer loop");
}
