//! Loop over a resolved list, one concurrent task per item.
//!
//! Iterations start from the same snapshot and run independently; their
//! results are merged back in index order. When any iteration pauses, a
//! record per iteration is written to the key-value store so that a later
//! resume can continue exactly the iteration the resume request addresses
//! and decide when the loop as a whole is done.

use super::{fail_own_step, fail_step, HandlerContext};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stepcore::{
    Action, EngineError, ExecutionState, FailureKind, LoopStep, StepExecutionPath, StepKind, StepMap,
    StepOutput, StepStatus, StoreError, Verdict, VerdictResponse,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

const ITEMS_NOT_A_LIST: &str = "The items you have selected must be a list.";

/// Bookkeeping for one iteration of a paused loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub index: usize,
    pub item: Value,
    pub paused: bool,
    /// Resume key of the iteration frame.
    pub path: String,
    #[serde(default)]
    pub pause_id: Option<String>,
    #[serde(default)]
    pub pause_metadata: Option<Value>,
    #[serde(default)]
    pub steps: StepMap,
}

impl IterationRecord {
    fn capture(index: usize, item: &Value, path: &StepExecutionPath, result: &ExecutionState) -> Self {
        let pause_metadata = match result.verdict_response() {
            Some(VerdictResponse::Paused { pause_metadata, .. }) => Some(pause_metadata.clone()),
            _ => None,
        };
        Self {
            index,
            item: item.clone(),
            paused: result.verdict() == Verdict::Paused,
            path: path.to_string(),
            pause_id: result.pause_id().map(str::to_string),
            pause_metadata,
            steps: result.steps_at_path().cloned().unwrap_or_default(),
        }
    }

    fn pause_entry(&self) -> Value {
        json!({
            "index": self.index,
            "path": self.path,
            "correlationId": self.pause_id,
            "metadata": self.pause_metadata,
        })
    }
}

pub(crate) async fn handle(
    ctx: &HandlerContext<'_>,
    action: &Action,
    step: &LoopStep,
    state: ExecutionState,
) -> Result<ExecutionState, EngineError> {
    let name = action.name.as_str();
    if state.is_completed(name) {
        debug!(step = %name, "Loop already completed");
        return Ok(state);
    }

    let unresolved = json!({ "items": step.items });
    let resolved = match ctx.services().resolver.resolve(&unresolved, &state).await {
        Ok(resolved) => resolved,
        Err(e) => {
            return Ok(fail_step(state, name, StepKind::LoopOnItems, Value::Null, e.kind(), e.to_string()))
        }
    };
    let Some(items) = resolved.resolved.get("items").and_then(Value::as_array).cloned() else {
        return Ok(fail_step(
            state,
            name,
            StepKind::LoopOnItems,
            resolved.censored,
            FailureKind::StepFailed,
            ITEMS_NOT_A_LIST,
        ));
    };

    let before = state.clone();
    let resume_key = ctx
        .constants
        .resume_payload
        .as_ref()
        .map(|payload| payload.path().unwrap_or_default().to_string());
    let result = match resume_key {
        Some(key) if state.is_paused(name) => resume_pass(ctx, name, step, state, &items, &key).await,
        _ => {
            let base_output = StepOutput::init(StepKind::LoopOnItems, resolved.censored);
            first_pass(ctx, name, step, state, base_output, &items).await
        }
    };

    match result {
        Ok(state) => Ok(state),
        Err(e) => {
            error!(step = %name, "Loop execution failed: {}", e);
            Ok(fail_own_step(before, name, StepKind::LoopOnItems, &e))
        }
    }
}

async fn first_pass(
    ctx: &HandlerContext<'_>,
    name: &str,
    step: &LoopStep,
    state: ExecutionState,
    base_output: StepOutput,
    items: &[Value],
) -> Result<ExecutionState, EngineError> {
    let body = match &step.first_loop_action {
        Some(body) if !ctx.constants.test_single_step_mode && !items.is_empty() => body.clone(),
        _ => {
            let output = match items.first() {
                Some(item) => base_output.with_item_and_index(item.clone(), 1),
                None => base_output,
            };
            return Ok(state.upsert_step(name, output.with_status(StepStatus::Succeeded)));
        }
    };

    let base_path = state.current_path().clone();
    let loop_pause_id = state.pause_id().map(str::to_string);
    let running = base_output.ensure_iteration(items.len() - 1);
    let state = state.upsert_step(name, running.clone());
    let baseline = state.task_count();

    let mut handles = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let iteration_state = state
            .clone()
            .upsert_step(name, running.clone().with_item_and_index(item.clone(), index + 1))
            .set_current_path(base_path.loop_iteration(name, index))
            .set_pause_id(Uuid::new_v4().to_string());
        let executor = ctx.executor.clone();
        let constants = ctx.constants.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            executor
                .execute_nested(Some(body), iteration_state, constants)
                .await
        }));
    }
    debug!(step = %name, iterations = items.len(), "Started loop iterations");

    let results = join_in_order(name, handles).await?;

    let mut merged = state;
    for (index, result) in results.iter().enumerate() {
        merged = absorb_iteration(merged, name, index, result, baseline);
    }

    if let Some(halted) = results
        .iter()
        .find(|r| matches!(r.verdict(), Verdict::Failed | Verdict::Stopped))
    {
        return Ok(halt_loop(merged, name, halted));
    }

    if results.iter().all(|r| r.verdict() != Verdict::Paused) {
        return Ok(complete_loop(merged, name, items));
    }

    let records = LoopRecords::new(ctx, &base_path, name);
    let mut entries = Vec::new();
    for (index, result) in results.iter().enumerate() {
        let record = IterationRecord::capture(index, &items[index], &base_path.loop_iteration(name, index), result);
        if record.paused {
            entries.push(record.pause_entry());
        }
        records.save(&record).await?;
    }
    info!(step = %name, paused = entries.len(), "Loop paused");
    Ok(pause_loop(merged, name, loop_pause_id, entries))
}

async fn resume_pass(
    ctx: &HandlerContext<'_>,
    name: &str,
    step: &LoopStep,
    state: ExecutionState,
    items: &[Value],
    resume_key: &str,
) -> Result<ExecutionState, EngineError> {
    let Some(body) = step.first_loop_action.clone() else {
        return Ok(complete_loop(state, name, items));
    };
    let base_path = state.current_path().clone();
    let records = LoopRecords::new(ctx, &base_path, name);
    let mut state = state;

    let target = (0..items.len()).find(|&index| base_path.loop_iteration(name, index).addresses(resume_key));
    if let Some(index) = target {
        if let Some(record) = records.load(index).await?.filter(|record| record.paused) {
            info!(step = %name, iteration = index, "Resuming loop iteration");
            let loop_output = state
                .get_step_output(name)
                .cloned()
                .unwrap_or_else(|| StepOutput::init(StepKind::LoopOnItems, Value::Null))
                .with_item_and_index(record.item.clone(), index + 1);
            let iteration_path = base_path.loop_iteration(name, index);
            let baseline = state.task_count();
            let iteration_state = state
                .clone()
                .upsert_step(name, loop_output)
                .set_iteration_steps(name, index, record.steps.clone())
                .set_current_path(iteration_path.clone())
                .set_pause_id(record.pause_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()));

            let result = ctx
                .executor
                .execute_nested(Some(body), iteration_state, ctx.constants.clone())
                .await?;
            records
                .save(&IterationRecord::capture(index, &record.item, &iteration_path, &result))
                .await?;
            state = absorb_iteration(state, name, index, &result, baseline);
            if matches!(result.verdict(), Verdict::Failed | Verdict::Stopped) {
                return Ok(halt_loop(state, name, &result));
            }
        }
    }

    let mut entries = Vec::new();
    for index in 0..items.len() {
        let record = records.load(index).await?.ok_or_else(|| {
            EngineError::Internal(format!("No record for iteration {} of paused loop '{}'", index, name))
        })?;
        if record.paused {
            entries.push(record.pause_entry());
        }
        state = state.set_iteration_steps(name, index, record.steps);
    }

    if entries.is_empty() {
        records.clear(items.len()).await?;
        return Ok(complete_loop(state, name, items));
    }
    let pause_id = state.pause_id().map(str::to_string);
    Ok(pause_loop(state, name, pause_id, entries))
}

/// Await iterations in index order, stopping at the first that halts the run.
async fn join_in_order(
    name: &str,
    handles: Vec<JoinHandle<Result<ExecutionState, EngineError>>>,
) -> Result<Vec<ExecutionState>, EngineError> {
    let mut results = Vec::with_capacity(handles.len());
    let mut pending = handles.into_iter();
    while let Some(handle) = pending.next() {
        let joined = handle.await.unwrap_or_else(|e| {
            Err(EngineError::Internal(format!(
                "Iteration {} of loop '{}' did not complete: {}",
                results.len(),
                name,
                e
            )))
        });
        let state = match joined {
            Ok(state) => state,
            Err(e) => {
                for rest in pending.by_ref() {
                    rest.abort();
                }
                return Err(e);
            }
        };
        let halted = matches!(state.verdict(), Verdict::Failed | Verdict::Stopped);
        results.push(state);
        if halted {
            for rest in pending.by_ref() {
                rest.abort();
            }
            break;
        }
    }
    Ok(results)
}

/// Copy one iteration's outputs, tags and task count into the loop's state.
fn absorb_iteration(
    state: ExecutionState,
    name: &str,
    index: usize,
    result: &ExecutionState,
    baseline: u64,
) -> ExecutionState {
    let steps = result.steps_at_path().cloned().unwrap_or_default();
    state
        .set_iteration_steps(name, index, steps)
        .add_tags(result.tags().to_vec())
        .increase_tasks(result.task_count().saturating_sub(baseline))
}

fn loop_output(state: &ExecutionState, name: &str) -> StepOutput {
    state
        .get_step_output(name)
        .cloned()
        .unwrap_or_else(|| StepOutput::init(StepKind::LoopOnItems, Value::Null))
}

fn complete_loop(state: ExecutionState, name: &str, items: &[Value]) -> ExecutionState {
    let output = match items.last() {
        Some(item) => loop_output(&state, name).with_item_and_index(item.clone(), items.len()),
        None => loop_output(&state, name),
    };
    state.upsert_step(name, output.with_status(StepStatus::Succeeded))
}

fn halt_loop(state: ExecutionState, name: &str, iteration: &ExecutionState) -> ExecutionState {
    let mut output = loop_output(&state, name);
    if iteration.verdict() == Verdict::Stopped {
        output = output.with_status(StepStatus::Stopped);
    } else {
        output = output.with_status(StepStatus::Failed);
        if let Some(VerdictResponse::Failed { message, .. }) = iteration.verdict_response() {
            output = output.with_error(message.clone());
        }
    }
    state
        .upsert_step(name, output)
        .set_verdict(iteration.verdict(), iteration.verdict_response().cloned())
}

fn pause_loop(
    state: ExecutionState,
    name: &str,
    pause_id: Option<String>,
    entries: Vec<Value>,
) -> ExecutionState {
    let correlation_id = pause_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let pause_metadata = json!({
        "path": state.current_path().to_string(),
        "loopName": name,
        "pausedIterations": entries,
    });
    let output = loop_output(&state, name).with_status(StepStatus::Paused);
    state
        .upsert_step(name, output)
        .set_pause_id(correlation_id.clone())
        .set_verdict(
            Verdict::Paused,
            Some(VerdictResponse::Paused {
                correlation_id,
                pause_metadata,
            }),
        )
}

/// Iteration records of one loop at one path, under
/// `<prefix>/<runId>/<pathPrefix><loopName>/<index>`.
struct LoopRecords<'a> {
    store: &'a dyn KeyValueStore,
    prefix: String,
}

impl<'a> LoopRecords<'a> {
    fn new(ctx: &HandlerContext<'a>, base_path: &StepExecutionPath, name: &str) -> Self {
        let services = ctx.services();
        let scope = if base_path.is_empty() {
            String::new()
        } else {
            format!("{}/", base_path)
        };
        Self {
            store: services.store.as_ref(),
            prefix: format!(
                "{}/{}/{}{}",
                services.loop_store_prefix, ctx.constants.flow_run_id, scope, name
            ),
        }
    }

    fn key(&self, index: usize) -> String {
        format!("{}/{}", self.prefix, index)
    }

    async fn save(&self, record: &IterationRecord) -> Result<(), EngineError> {
        self.store
            .put(&self.key(record.index), serde_json::to_value(record)?)
            .await?;
        Ok(())
    }

    async fn load(&self, index: usize) -> Result<Option<IterationRecord>, EngineError> {
        let key = self.key(index);
        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Malformed { key, message: e.to_string() }.into())
    }

    async fn clear(&self, count: usize) -> Result<(), EngineError> {
        for index in 0..count {
            self.store.delete(&self.key(index)).await?;
        }
        Ok(())
    }
}
