use crate::handlers::{self, HandlerContext};
use crate::services::EngineServices;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Instant;
use stepcore::{
    Action, ActionKind, EngineError, ExecutionConstants, ExecutionState, ProgressUpdateMode,
};
use tracing::{debug, error, warn};

/// Walks an action chain, dispatching each action to its handler.
///
/// Cheap to clone; loop iterations take their own copy into spawned tasks.
#[derive(Clone)]
pub struct FlowExecutor {
    services: Arc<EngineServices>,
}

impl FlowExecutor {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Execute a chain at the top level of a run.
    pub fn execute(
        &self,
        action: Option<Arc<Action>>,
        state: ExecutionState,
        constants: Arc<ExecutionConstants>,
    ) -> BoxFuture<'_, Result<ExecutionState, EngineError>> {
        self.walk(action, state, constants, false)
    }

    /// Execute a chain nested inside a branch, split or loop iteration.
    pub fn execute_nested(
        &self,
        action: Option<Arc<Action>>,
        state: ExecutionState,
        constants: Arc<ExecutionConstants>,
    ) -> BoxFuture<'_, Result<ExecutionState, EngineError>> {
        self.walk(action, state, constants, true)
    }

    fn walk(
        &self,
        first: Option<Arc<Action>>,
        state: ExecutionState,
        constants: Arc<ExecutionConstants>,
        nested: bool,
    ) -> BoxFuture<'_, Result<ExecutionState, EngineError>> {
        async move {
            let started = Instant::now();
            let previous_duration = state.duration_ms();
            let mut state = state;
            let mut current = first;

            while let Some(action) = current {
                if constants.is_past_deadline() {
                    let err = EngineError::DeadlineExceeded {
                        timeout_secs: constants.timeout.as_secs(),
                    };
                    error!(step = %action.name, "Aborting run: {}", err);
                    return Ok(state.fail(err.kind(), Some(&action.name), err.to_string()));
                }

                if action.skip {
                    debug!(step = %action.name, "Skipping step");
                    current = action.next_action.clone();
                    continue;
                }

                let already_completed = state.is_completed(&action.name);
                let step_started = Instant::now();
                debug!(
                    step = %action.name,
                    action_type = %action.action_type(),
                    path = %state.current_path(),
                    "Dispatching step"
                );

                state = self.dispatch(&action, state, &constants).await?;

                if !already_completed {
                    let elapsed = step_started.elapsed().as_millis() as u64;
                    state = state.set_step_duration(&action.name, elapsed);
                }

                if !state.is_running() {
                    debug!(step = %action.name, verdict = ?state.verdict(), "Halting chain");
                    break;
                }

                if !nested && constants.progress_update_mode == ProgressUpdateMode::Continuous {
                    if let Err(e) = self.services.progress.report(&state, &constants).await {
                        warn!("Ignoring failed progress update: {}", e);
                    }
                }

                current = action.next_action.clone();
            }

            if !nested {
                let total = previous_duration + started.elapsed().as_millis() as u64;
                state = state.set_duration(total);
            }
            Ok(state)
        }
        .boxed()
    }

    async fn dispatch(
        &self,
        action: &Action,
        state: ExecutionState,
        constants: &Arc<ExecutionConstants>,
    ) -> Result<ExecutionState, EngineError> {
        let ctx = HandlerContext {
            executor: self,
            constants,
        };
        match &action.kind {
            ActionKind::Code(step) => Ok(handlers::code::handle(&ctx, action, step, state).await),
            ActionKind::Block(step) => Ok(handlers::block::handle(&ctx, action, step, state).await),
            ActionKind::Branch(step) => handlers::branch::handle(&ctx, action, step, state).await,
            ActionKind::Split(step) => handlers::split::handle(&ctx, action, step, state).await,
            ActionKind::LoopOnItems(step) => handlers::loop_on_items::handle(&ctx, action, step, state).await,
        }
    }
}
