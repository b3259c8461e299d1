use super::{fail_own_step, fail_step, HandlerContext};
use crate::condition;
use serde_json::{json, Value};
use stepcore::{
    Action, BranchStep, EngineError, ExecutionState, StepKind, StepOutput, StepStatus,
};
use tracing::{debug, error};

pub(crate) async fn handle(
    ctx: &HandlerContext<'_>,
    action: &Action,
    step: &BranchStep,
    state: ExecutionState,
) -> Result<ExecutionState, EngineError> {
    let name = action.name.as_str();

    let (outcome, state) = match recorded_outcome(&state, name) {
        Some(outcome) => (outcome, state),
        None => {
            let resolved = match ctx.services().resolver.resolve(&step.conditions, &state).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    return Ok(fail_step(state, name, StepKind::Branch, Value::Null, e.kind(), e.to_string()))
                }
            };
            let input = json!({ "conditions": resolved.censored });
            match condition::evaluate_resolved(&resolved.resolved) {
                Ok(outcome) => {
                    let output = StepOutput::init(StepKind::Branch, input)
                        .with_status(StepStatus::Succeeded)
                        .with_output(json!({ "condition": outcome }));
                    (outcome, state.upsert_step(name, output))
                }
                Err(e) => {
                    let err = EngineError::from(e);
                    return Ok(fail_step(state, name, StepKind::Branch, input, err.kind(), err.to_string()));
                }
            }
        }
    };

    let next = if outcome {
        &step.on_success_action
    } else {
        &step.on_failure_action
    };
    let Some(next) = next else {
        return Ok(state);
    };

    debug!(step = %name, outcome, first = %next.name, "Entering branch");
    let before = state.clone();
    match ctx
        .executor
        .execute_nested(Some(next.clone()), state, ctx.constants.clone())
        .await
    {
        Ok(state) => Ok(state),
        Err(e) => {
            error!(step = %name, "Branch execution failed: {}", e);
            Ok(fail_own_step(before, name, StepKind::Branch, &e))
        }
    }
}

/// Outcome recorded by an earlier pass over the same run.
fn recorded_outcome(state: &ExecutionState, name: &str) -> Option<bool> {
    state
        .get_step_output(name)
        .filter(|step| step.status == StepStatus::Succeeded)?
        .output
        .as_ref()?
        .get("condition")?
        .as_bool()
}
