#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use stepcore::{
    Action, ExecutionConstants, ExecutionState, ExecutionType, StepError, StepKind, StepOutput,
    StepStatus, StopResponse,
};
use stepruntime::{
    BlockAction, BlockContext, BlockOutcome, BlockRegistry, CodeModuleRequest, CodeModuleRunner,
    EngineServices, FlowExecutor, InMemoryStore, PropertyDefinition, PropertySchema, PropertyType,
};
use tokio::time::Instant;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

type Behaviour = Box<dyn Fn(&CodeModuleRequest, usize) -> Result<Value, StepError> + Send + Sync>;

/// Code runner driven by a closure that sees the request and how many
/// times the same step has been called before.
pub struct FakeCodeRunner {
    behaviour: Behaviour,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeCodeRunner {
    pub fn new(
        behaviour: impl Fn(&CodeModuleRequest, usize) -> Result<Value, StepError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Box::new(behaviour),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Returns the step's inputs as its output.
    pub fn echo() -> Arc<Self> {
        Self::new(|request, _| Ok(request.inputs.clone()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(step, _)| step.clone()).collect()
    }

    pub fn calls_for(&self, step: &str) -> usize {
        self.call_times_for(step).len()
    }

    pub fn call_times_for(&self, step: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == step)
            .map(|(_, at)| *at)
            .collect()
    }
}

/// Step name from `<dir>/<flowVersion>/<step>/index.js`.
pub fn step_of(request: &CodeModuleRequest) -> String {
    request
        .code_file
        .rsplit('/')
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl CodeModuleRunner for FakeCodeRunner {
    async fn run_code_module(&self, request: CodeModuleRequest) -> Result<Value, StepError> {
        let step = step_of(&request);
        let previous = {
            let mut calls = self.calls.lock().unwrap();
            let previous = calls.iter().filter(|(name, _)| *name == step).count();
            calls.push((step, Instant::now()));
            previous
        };
        (self.behaviour)(&request, previous)
    }
}

/// Pauses on begin; on resume returns the resume body.
pub struct WaitAction;

#[async_trait]
impl BlockAction for WaitAction {
    fn name(&self) -> &str {
        "wait"
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        match ctx.execution_type {
            ExecutionType::Begin => Ok(ctx.pause(json!({ "waitingOn": ctx.props_value.get("label") }))),
            ExecutionType::Resume => {
                let body = ctx
                    .resume_payload
                    .as_ref()
                    .map(|payload| payload.body.clone())
                    .unwrap_or(Value::Null);
                Ok(BlockOutcome::Completed(json!({ "resumedWith": body })))
            }
        }
    }
}

pub struct FailAction;

#[async_trait]
impl BlockAction for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, _ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        Err(StepError::Execution("integration exploded".to_string()))
    }
}

pub struct StopAction;

#[async_trait]
impl BlockAction for StopAction {
    fn name(&self) -> &str {
        "stop"
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        Ok(ctx.stop(StopResponse {
            status: 202,
            body: json!({ "stoppedAt": ctx.step_name }),
            ..Default::default()
        }))
    }
}

/// Tags the run and returns a typed count.
pub struct TagAction;

#[async_trait]
impl BlockAction for TagAction {
    fn name(&self) -> &str {
        "tag"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert("tag".to_string(), PropertyDefinition::new("Tag", PropertyType::ShortText).required());
        props.insert("count".to_string(), PropertyDefinition::new("Count", PropertyType::Number));
        props
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let tag = ctx.prop_str("tag").unwrap_or_default().to_string();
        ctx.add_tag(tag);
        Ok(BlockOutcome::Completed(json!({ "count": ctx.props_value.get("count") })))
    }
}

pub struct Harness {
    pub executor: FlowExecutor,
    pub code: Arc<FakeCodeRunner>,
    pub store: Arc<InMemoryStore>,
}

pub fn test_registry() -> BlockRegistry {
    let mut registry = BlockRegistry::new();
    registry.register("test", "1.0.0", Arc::new(WaitAction));
    registry.register("test", "1.0.0", Arc::new(FailAction));
    registry.register("test", "1.0.0", Arc::new(StopAction));
    registry.register("test", "1.0.0", Arc::new(TagAction));
    registry
}

pub fn harness(code: Arc<FakeCodeRunner>) -> Harness {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let services = EngineServices::builder()
        .code_runner(code.clone())
        .blocks(Arc::new(test_registry()))
        .store(store.clone())
        .build();
    Harness {
        executor: FlowExecutor::new(Arc::new(services)),
        code,
        store,
    }
}

pub fn constants() -> ExecutionConstants {
    let mut constants = ExecutionConstants::new("run-1");
    constants.flow_id = "flow-1".to_string();
    constants.flow_version_id = "version-1".to_string();
    constants.public_api_url = "https://engine.test".to_string();
    constants
}

pub fn code(name: &str, input: Value) -> Value {
    json!({ "name": name, "type": "CODE", "settings": { "input": input } })
}

pub fn block(name: &str, action: &str, input: Value) -> Value {
    json!({
        "name": name,
        "type": "BLOCK",
        "settings": {
            "blockName": "test",
            "blockVersion": "1.0.0",
            "actionName": action,
            "input": input
        }
    })
}

pub fn with_error_handling(mut step: Value, continue_on_failure: bool, retry_on_failure: bool) -> Value {
    step["settings"]["errorHandlingOptions"] = json!({
        "continueOnFailure": continue_on_failure,
        "retryOnFailure": retry_on_failure,
    });
    step
}

/// Link steps through `nextAction`, first step first.
pub fn chain(steps: Vec<Value>) -> Value {
    let mut next: Option<Value> = None;
    for mut step in steps.into_iter().rev() {
        if let Some(successor) = next.take() {
            step["nextAction"] = successor;
        }
        next = Some(step);
    }
    next.unwrap_or(Value::Null)
}

pub fn build(chain: Value) -> Arc<Action> {
    Arc::new(Action::from_json(chain).expect("test flow should parse"))
}

pub fn trigger_state(payload: Value) -> ExecutionState {
    let trigger = StepOutput::init(StepKind::Trigger, Value::Null)
        .with_status(StepStatus::Succeeded)
        .with_output(payload);
    ExecutionState::new().upsert_step("trigger", trigger)
}
