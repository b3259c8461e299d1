use super::{fail_step, retry, HandlerContext};
use crate::context::{BlockContext, BlockContextParts, BlockOutcome};
use crate::store::ScopedStore;
use serde_json::{json, Value};
use stepcore::{
    Action, BlockStep, ExecutionState, ExecutionType, FailureKind, StepKind, StepOutput, StepStatus,
    Verdict, VerdictResponse,
};
use tracing::{debug, info};

pub(crate) async fn handle(
    ctx: &HandlerContext<'_>,
    action: &Action,
    step: &BlockStep,
    state: ExecutionState,
) -> ExecutionState {
    if state.is_completed(&action.name) {
        debug!(step = %action.name, "Block step already completed");
        return state;
    }
    let resuming = state.is_paused(&action.name) && ctx.constants.resume_payload.is_some();
    retry::run_with_policy(ctx, action, state, |state| {
        run_once(ctx, action, step, state, resuming)
    })
    .await
}

async fn run_once(
    ctx: &HandlerContext<'_>,
    action: &Action,
    step: &BlockStep,
    state: ExecutionState,
    resuming: bool,
) -> ExecutionState {
    let services = ctx.services();
    let constants = ctx.constants;
    let name = action.name.as_str();

    let loaded = match services
        .blocks
        .load(&step.block_name, &step.block_version, &step.action_name)
        .await
    {
        Ok(loaded) => loaded,
        Err(e) => {
            return fail_step(state, name, StepKind::Block, Value::Null, FailureKind::Configuration, e.to_string())
        }
    };

    let resolved = match services.resolver.resolve(&step.input, &state).await {
        Ok(resolved) => resolved,
        Err(e) => return fail_step(state, name, StepKind::Block, Value::Null, e.kind(), e.to_string()),
    };

    let processed = services.resolver.apply_processors_and_validators(
        &resolved.resolved,
        &loaded.props,
        loaded.auth.as_ref(),
    );
    if !processed.errors.is_empty() {
        let message = format!(
            "Action {} has invalid input: {}",
            step.action_name,
            Value::Object(processed.errors)
        );
        return fail_step(state, name, StepKind::Block, resolved.censored, FailureKind::Configuration, message);
    }

    let mut block_ctx = BlockContext::new(BlockContextParts {
        step_name: name.to_string(),
        props_value: processed.processed,
        execution_type: if resuming {
            ExecutionType::Resume
        } else {
            ExecutionType::Begin
        },
        resume_payload: if resuming {
            constants.resume_payload.clone()
        } else {
            None
        },
        flow_id: constants.flow_id.clone(),
        flow_run_id: constants.flow_run_id.clone(),
        project_id: constants.project_id.clone(),
        public_api_url: constants.public_api_url.clone(),
        path: state.current_path().clone(),
        pause_id: state.pause_id().map(str::to_string),
        store: ScopedStore::new(services.store.clone(), &constants.flow_id, &constants.flow_run_id),
        files: services.files.clone(),
        connections: services.connections.clone(),
    });

    debug!(
        step = %name,
        block = %step.block_name,
        action = %step.action_name,
        resuming,
        "Running block action"
    );
    let result = loaded.action.run(&mut block_ctx).await;
    let tags = std::mem::take(&mut block_ctx.tags);
    let output = StepOutput::init(StepKind::Block, resolved.censored);

    match result {
        Ok(BlockOutcome::Completed(value)) => state
            .upsert_step(name, output.with_status(StepStatus::Succeeded).with_output(value))
            .add_tags(tags)
            .increase_task(),
        Ok(BlockOutcome::Stopped(response)) => {
            info!(step = %name, status = response.status, "Block stopped the run");
            state
                .upsert_step(
                    name,
                    output
                        .with_status(StepStatus::Stopped)
                        .with_output(response.body.clone()),
                )
                .add_tags(tags)
                .increase_task()
                .set_verdict(Verdict::Stopped, Some(VerdictResponse::Stopped { response }))
        }
        Ok(BlockOutcome::Paused(request)) => {
            info!(step = %name, correlation_id = %request.request_id, "Block paused the run");
            let pause_metadata = json!({
                "path": state.current_path().to_string(),
                "metadata": request.metadata,
            });
            state
                .upsert_step(name, output.with_status(StepStatus::Paused))
                .add_tags(tags)
                .set_pause_id(request.request_id.clone())
                .set_verdict(
                    Verdict::Paused,
                    Some(VerdictResponse::Paused {
                        correlation_id: request.request_id,
                        pause_metadata,
                    }),
                )
        }
        Err(e) => {
            let message = e.to_string();
            state
                .upsert_step(name, output.with_status(StepStatus::Failed).with_error(message.clone()))
                .add_tags(tags)
                .fail(FailureKind::StepFailed, Some(name), message)
        }
    }
}
