use super::{fail_own_step, fail_step, HandlerContext};
use crate::condition;
use serde_json::{json, Value};
use stepcore::{
    Action, EngineError, ExecutionState, SplitOption, SplitStep, StepKind, StepOutput, StepStatus,
};
use tracing::{debug, error};

pub(crate) async fn handle(
    ctx: &HandlerContext<'_>,
    action: &Action,
    step: &SplitStep,
    state: ExecutionState,
) -> Result<ExecutionState, EngineError> {
    let name = action.name.as_str();

    let (selected_id, state) = match recorded_selection(&state, name) {
        Some(id) => (id, state),
        None => match select_option(ctx, name, step, state).await {
            Ok(selected) => selected,
            Err(failed) => return Ok(failed),
        },
    };

    let Some(branch) = step.branch_for(&selected_id) else {
        let option_name = option_name(step, &selected_id);
        let err = EngineError::Configuration(format!(
            "No branch found for selected option '{}' (id '{}')",
            option_name, selected_id
        ));
        return Ok(fail_own_step(state, name, StepKind::Split, &err));
    };
    let Some(first) = branch.action.clone() else {
        return Ok(state);
    };

    debug!(step = %name, option = %selected_id, first = %first.name, "Entering split branch");
    let before = state.clone();
    match ctx
        .executor
        .execute_nested(Some(first), state, ctx.constants.clone())
        .await
    {
        Ok(state) => Ok(state),
        Err(e) => {
            error!(step = %name, "Split execution failed: {}", e);
            Ok(fail_own_step(before, name, StepKind::Split, &e))
        }
    }
}

/// Evaluate every non-default option and record the choice.
///
/// Returns the failed state as the error value when the step cannot select
/// an option.
async fn select_option(
    ctx: &HandlerContext<'_>,
    name: &str,
    step: &SplitStep,
    state: ExecutionState,
) -> Result<(String, ExecutionState), ExecutionState> {
    let candidates: Vec<&SplitOption> = step
        .options
        .iter()
        .filter(|option| option.id != step.default_branch_id)
        .collect();
    let unresolved = Value::Array(candidates.iter().map(|o| o.conditions.clone()).collect());

    let resolved = match ctx.services().resolver.resolve(&unresolved, &state).await {
        Ok(resolved) => resolved,
        Err(e) => return Err(fail_step(state, name, StepKind::Split, Value::Null, e.kind(), e.to_string())),
    };
    let input = json!({ "options": resolved.censored, "defaultBranchId": step.default_branch_id });

    let mut matched: Vec<&SplitOption> = Vec::new();
    for (index, option) in candidates.iter().enumerate() {
        let conditions = resolved.resolved.get(index).unwrap_or(&Value::Null);
        match condition::evaluate_resolved(conditions) {
            Ok(true) => matched.push(option),
            Ok(false) => {}
            Err(e) => {
                let err = EngineError::from(e);
                return Err(fail_step(state, name, StepKind::Split, input, err.kind(), err.to_string()));
            }
        }
    }

    if matched.len() > 1 {
        let names: Vec<&str> = matched.iter().map(|o| o.name.as_str()).collect();
        let err = EngineError::Configuration(format!(
            "Multiple split options matched: {}. Exactly one option may match; adjust the conditions so they do not overlap.",
            names.join(", ")
        ));
        return Err(fail_step(state, name, StepKind::Split, input, err.kind(), err.to_string()));
    }

    let selected_id = matched
        .first()
        .map(|option| option.id.clone())
        .unwrap_or_else(|| step.default_branch_id.clone());
    let output = StepOutput::init(StepKind::Split, input)
        .with_status(StepStatus::Succeeded)
        .with_output(json!({
            "selectedOptionId": selected_id,
            "selectedOptionName": option_name(step, &selected_id),
        }));
    Ok((selected_id, state.upsert_step(name, output)))
}

fn recorded_selection(state: &ExecutionState, name: &str) -> Option<String> {
    state
        .get_step_output(name)
        .filter(|step| step.status == StepStatus::Succeeded)?
        .output
        .as_ref()?
        .get("selectedOptionId")?
        .as_str()
        .map(str::to_string)
}

fn option_name(step: &SplitStep, id: &str) -> String {
    step.options
        .iter()
        .find(|option| option.id == id)
        .map(|option| option.name.clone())
        .unwrap_or_else(|| "default".to_string())
}
