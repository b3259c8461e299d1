//! One handler per action kind. Each consumes a state and returns the next.

pub(crate) mod block;
pub(crate) mod branch;
pub(crate) mod code;
pub(crate) mod loop_on_items;
pub(crate) mod retry;
pub(crate) mod split;

use crate::executor::FlowExecutor;
use crate::services::EngineServices;
use serde_json::Value;
use std::sync::Arc;
use stepcore::{
    EngineError, ExecutionConstants, ExecutionState, FailureKind, StepKind, StepOutput, StepStatus,
};

pub(crate) struct HandlerContext<'a> {
    pub executor: &'a FlowExecutor,
    pub constants: &'a Arc<ExecutionConstants>,
}

impl<'a> HandlerContext<'a> {
    pub fn services(&self) -> &'a EngineServices {
        self.executor.services()
    }
}

/// Record a fresh FAILED step and fail the run with the same message.
pub(crate) fn fail_step(
    state: ExecutionState,
    name: &str,
    kind: StepKind,
    input: Value,
    failure: FailureKind,
    message: impl Into<String>,
) -> ExecutionState {
    let message = message.into();
    let output = StepOutput::init(kind, input)
        .with_status(StepStatus::Failed)
        .with_error(message.clone());
    state.upsert_step(name, output).fail(failure, Some(name), message)
}

/// Flip an already-recorded step to FAILED, keeping its input, output and
/// iterations.
pub(crate) fn fail_own_step(
    state: ExecutionState,
    name: &str,
    kind: StepKind,
    error: &EngineError,
) -> ExecutionState {
    let message = error.to_string();
    let output = state
        .get_step_output(name)
        .cloned()
        .unwrap_or_else(|| StepOutput::init(kind, Value::Null))
        .with_status(StepStatus::Failed)
        .with_error(message.clone());
    state
        .upsert_step(name, output)
        .fail(error.kind(), Some(name), message)
}
