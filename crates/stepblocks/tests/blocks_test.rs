use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use stepblocks::{
    register_all, AddTag, DebugLog, Delay, JsonParse, JsonStringify, ReturnResponse, StorageDelete,
    StorageGet, StoragePut, WaitForApproval, WriteFile, BLOCK_VERSION,
};
use stepcore::{ExecutionType, ResumePayload, StepError, StepExecutionPath};
use stepruntime::{
    BlockAction, BlockContext, BlockContextParts, BlockLoader, BlockOutcome, BlockRegistry,
    InMemoryFileStore, InMemoryStore, ScopedStore, StaticConnections,
};

// Helper function to create a test context
fn create_test_context(props: Value) -> BlockContext {
    create_context_with(props, Arc::new(InMemoryStore::new()), ExecutionType::Begin, None)
}

fn create_context_with(
    props: Value,
    store: Arc<InMemoryStore>,
    execution_type: ExecutionType,
    resume_payload: Option<ResumePayload>,
) -> BlockContext {
    BlockContext::new(BlockContextParts {
        step_name: "step_1".to_string(),
        props_value: props,
        execution_type,
        resume_payload,
        flow_id: "flow-1".to_string(),
        flow_run_id: "run-1".to_string(),
        project_id: "project-1".to_string(),
        public_api_url: "https://engine.test/".to_string(),
        path: StepExecutionPath::empty(),
        pause_id: None,
        store: ScopedStore::new(store, "flow-1", "run-1"),
        files: Arc::new(InMemoryFileStore::new()),
        connections: Arc::new(StaticConnections::new()),
    })
}

fn completed(outcome: BlockOutcome) -> Value {
    match outcome {
        BlockOutcome::Completed(value) => value,
        other => panic!("expected a completed outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_debug_log_echoes_message() {
    let mut ctx = create_test_context(json!({ "message": "hello" }));
    let output = completed(DebugLog.run(&mut ctx).await.unwrap());
    assert_eq!(output, json!({ "message": "hello" }));
}

#[tokio::test]
async fn test_json_parse() {
    let mut ctx = create_test_context(json!({ "json": "{\"a\": [1, 2]}" }));
    let output = completed(JsonParse.run(&mut ctx).await.unwrap());
    assert_eq!(output, json!({ "a": [1, 2] }));
}

#[tokio::test]
async fn test_json_parse_rejects_invalid_input() {
    let mut ctx = create_test_context(json!({ "json": "{not json" }));
    let result = JsonParse.run(&mut ctx).await;
    assert!(matches!(result, Err(StepError::Execution(msg)) if msg.contains("JSON parse error")));

    let mut ctx = create_test_context(json!({}));
    let result = JsonParse.run(&mut ctx).await;
    assert!(matches!(result, Err(StepError::InvalidInput { field, .. }) if field == "json"));
}

#[tokio::test]
async fn test_json_stringify_compact() {
    let mut ctx = create_test_context(json!({ "value": { "b": true } }));
    let output = completed(JsonStringify.run(&mut ctx).await.unwrap());
    assert_eq!(output, json!("{\"b\":true}"));
}

#[tokio::test(start_paused = true)]
async fn test_delay_waits_for_requested_time() {
    let mut ctx = create_test_context(json!({ "delay_ms": 250 }));
    let started = tokio::time::Instant::now();
    let output = completed(Delay.run(&mut ctx).await.unwrap());
    assert_eq!(output, json!({ "delayedMs": 250 }));
    assert!(started.elapsed() >= std::time::Duration::from_millis(250));
}

#[tokio::test]
async fn test_add_tag_is_returned_through_context() {
    let mut ctx = create_test_context(json!({ "tag": "vip" }));
    let output = completed(AddTag.run(&mut ctx).await.unwrap());
    assert_eq!(output, json!({ "tag": "vip" }));
    assert_eq!(ctx.tags, vec!["vip".to_string()]);
}

#[tokio::test]
async fn test_return_response_stops_run() {
    let mut ctx = create_test_context(json!({
        "status": 201,
        "body": { "ok": true },
        "headers": { "x-run": "run-1", "x-count": 3 }
    }));
    match ReturnResponse.run(&mut ctx).await.unwrap() {
        BlockOutcome::Stopped(response) => {
            assert_eq!(response.status, 201);
            assert_eq!(response.body, json!({ "ok": true }));
            assert_eq!(response.headers.get("x-run").map(String::as_str), Some("run-1"));
            assert_eq!(response.headers.get("x-count").map(String::as_str), Some("3"));
        }
        other => panic!("expected a stop, got {:?}", other),
    }
}

#[tokio::test]
async fn test_approval_pauses_then_reads_resume_action() {
    let mut ctx = create_test_context(json!({}));
    let request = match WaitForApproval.run(&mut ctx).await.unwrap() {
        BlockOutcome::Paused(request) => request,
        other => panic!("expected a pause, got {:?}", other),
    };
    let approve = request.metadata["approvalLink"].as_str().unwrap();
    assert_eq!(
        approve,
        format!(
            "https://engine.test/v1/flow-runs/run-1/requests/{}?action=approve",
            request.request_id
        )
    );

    let payload = ResumePayload {
        query_params: HashMap::from([("action".to_string(), "approve".to_string())]),
        ..Default::default()
    };
    let mut ctx = create_context_with(
        json!({}),
        Arc::new(InMemoryStore::new()),
        ExecutionType::Resume,
        Some(payload),
    );
    let output = completed(WaitForApproval.run(&mut ctx).await.unwrap());
    assert_eq!(output, json!({ "approved": true }));
}

#[tokio::test]
async fn test_storage_put_get_delete() {
    let store = Arc::new(InMemoryStore::new());

    let mut ctx = create_context_with(
        json!({ "key": "counter", "value": 5, "scope": "FLOW" }),
        store.clone(),
        ExecutionType::Begin,
        None,
    );
    completed(StoragePut.run(&mut ctx).await.unwrap());
    assert_eq!(store.snapshot().await.get("flow_flow-1/counter"), Some(&json!(5)));

    let mut ctx = create_context_with(
        json!({ "key": "counter", "scope": "FLOW" }),
        store.clone(),
        ExecutionType::Begin,
        None,
    );
    assert_eq!(completed(StorageGet.run(&mut ctx).await.unwrap()), json!(5));

    let mut ctx = create_context_with(
        json!({ "key": "counter", "defaultValue": 0 }),
        store.clone(),
        ExecutionType::Begin,
        None,
    );
    assert_eq!(
        completed(StorageGet.run(&mut ctx).await.unwrap()),
        json!(0),
        "run scope does not see flow-scoped keys"
    );

    let mut ctx = create_context_with(
        json!({ "key": "counter", "scope": "FLOW" }),
        store.clone(),
        ExecutionType::Begin,
        None,
    );
    assert_eq!(completed(StorageDelete.run(&mut ctx).await.unwrap()), json!(5));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_storage_rejects_unknown_scope() {
    let mut ctx = create_test_context(json!({ "key": "k", "scope": "GLOBAL" }));
    let result = StorageGet.run(&mut ctx).await;
    assert!(matches!(result, Err(StepError::InvalidInput { field, .. }) if field == "scope"));
}

#[tokio::test]
async fn test_write_file_returns_url() {
    let mut ctx = create_test_context(json!({ "fileName": "report.txt", "content": "hello" }));
    let output = completed(WriteFile.run(&mut ctx).await.unwrap());
    assert_eq!(output["size"], json!(5));
    assert!(output["url"].as_str().unwrap().contains("report.txt"));
}

#[tokio::test]
async fn test_register_all_exposes_every_action() {
    let mut registry = BlockRegistry::new();
    register_all(&mut registry);

    let listed = registry.list_actions();
    assert!(listed.contains(&(
        "transform".to_string(),
        BLOCK_VERSION.to_string(),
        "parse_json".to_string()
    )));
    assert_eq!(listed.len(), 12);

    let loaded = registry
        .load("http", "^0.1.0", "send_request")
        .await
        .expect("http action should load");
    assert!(loaded.props.get("url").unwrap().required);

    assert!(registry.load("http", "9.9.9", "send_request").await.is_err());
}
