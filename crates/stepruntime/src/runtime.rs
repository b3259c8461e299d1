use crate::config::RuntimeConfig;
use crate::executor::FlowExecutor;
use crate::progress::BroadcastProgressReporter;
use crate::services::{EngineServices, EngineServicesBuilder};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use stepcore::{
    EngineError, EngineOperation, EventBus, ExecuteFlowOperation, ExecuteStepOperation,
    ExecutionConstants, ExecutionState, FlowVersion, ProgressEvent, StepExecutionPath, StepKind,
    StepOutput, StepStatus, Verdict, VerdictResponse,
};
use tracing::{info, warn};

/// Main entry point for running operations against a flow version
pub struct FlowRuntime {
    config: RuntimeConfig,
    executor: FlowExecutor,
    event_bus: Arc<EventBus>,
}

impl FlowRuntime {
    /// Create a runtime with default configuration
    pub fn new(services: EngineServices) -> Self {
        Self::with_config(services, RuntimeConfig::default())
    }

    pub fn with_config(mut services: EngineServices, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        services.loop_store_prefix = config.loop_store_prefix.clone();
        Self {
            executor: FlowExecutor::new(Arc::new(services)),
            event_bus,
            config,
        }
    }

    /// Create a runtime whose progress snapshots go to its own event bus
    pub fn with_broadcast_progress(builder: EngineServicesBuilder, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let services = builder
            .progress(Arc::new(BroadcastProgressReporter::new(event_bus.clone())))
            .loop_store_prefix(config.loop_store_prefix.clone())
            .build();
        Self {
            executor: FlowExecutor::new(Arc::new(services)),
            event_bus,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn executor(&self) -> &FlowExecutor {
        &self.executor
    }

    /// Subscribe to progress and completion events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run an operation. `previous` is the state a paused run left behind.
    pub async fn execute(
        &self,
        operation: &EngineOperation,
        previous: Option<ExecutionState>,
    ) -> Result<ExecutionState, EngineError> {
        let constants = Arc::new(self.config.constants_for(operation));
        match operation {
            EngineOperation::ExecuteFlow(op) => self.execute_flow(op, constants, previous).await,
            EngineOperation::ExecuteStep(op) => self.execute_step(op, constants).await,
            EngineOperation::ExecuteProperty(op) => Err(EngineError::Configuration(format!(
                "Property '{}' of {}/{} cannot be executed by the step engine",
                op.property_name, op.block_name, op.action_name
            ))),
            EngineOperation::ExecuteTrigger(op) => Err(EngineError::Configuration(format!(
                "Trigger hook {:?} of flow {} cannot be executed by the step engine",
                op.hook_type, op.base.flow_version.flow_id
            ))),
        }
    }

    /// Start a run from its trigger payload, or resume a paused one.
    pub async fn execute_flow(
        &self,
        operation: &ExecuteFlowOperation,
        constants: Arc<ExecutionConstants>,
        previous: Option<ExecutionState>,
    ) -> Result<ExecutionState, EngineError> {
        let flow = &operation.base.flow_version;
        let state = match previous {
            Some(state) => {
                info!(run = %constants.flow_run_id, flow = %flow.flow_id, "Resuming flow run");
                state
                    .set_verdict(Verdict::Running, None)
                    .set_current_path(StepExecutionPath::empty())
            }
            None => {
                info!(run = %constants.flow_run_id, flow = %flow.flow_id, "Starting flow run");
                let trigger = StepOutput::init(StepKind::Trigger, Value::Null)
                    .with_status(StepStatus::Succeeded)
                    .with_output(operation.trigger_payload.clone());
                ExecutionState::new().upsert_step(flow.trigger.name.clone(), trigger)
            }
        };

        let state = self
            .executor
            .execute(flow.first_action(), state, constants.clone())
            .await?;
        Ok(self.finish(state, &constants))
    }

    /// Run one step on its own, against sample outputs of earlier steps.
    pub async fn execute_step(
        &self,
        operation: &ExecuteStepOperation,
        constants: Arc<ExecutionConstants>,
    ) -> Result<ExecutionState, EngineError> {
        let flow = &operation.base.flow_version;
        let action = flow
            .find_action(&operation.step_name)
            .ok_or_else(|| EngineError::StepNotFound(operation.step_name.clone()))?
            .detached();

        let mut names: Vec<&String> = operation.sample_data.keys().collect();
        names.sort();
        let mut state = ExecutionState::new();
        for name in names {
            let output = StepOutput::init(sample_kind(flow, name), Value::Null)
                .with_status(StepStatus::Succeeded)
                .with_output(operation.sample_data[name].clone());
            state = state.upsert_step(name.clone(), output);
        }

        info!(step = %operation.step_name, "Testing single step");
        let state = self
            .executor
            .execute(Some(Arc::new(action)), state, constants.clone())
            .await?;
        Ok(self.finish(state, &constants))
    }

    /// RUNNING at the end of the chain means the run succeeded.
    fn finish(&self, state: ExecutionState, constants: &ExecutionConstants) -> ExecutionState {
        let state = if state.is_running() {
            let output = state.steps().values().last().and_then(|step| step.output.clone());
            state.set_verdict(Verdict::Succeeded, Some(VerdictResponse::Succeeded { output }))
        } else {
            state
        };

        match state.verdict_response() {
            Some(VerdictResponse::Failed { step_name, message, .. }) => warn!(
                run = %constants.flow_run_id,
                step = step_name.as_deref().unwrap_or("-"),
                "Run failed: {}",
                message
            ),
            _ => info!(
                run = %constants.flow_run_id,
                verdict = ?state.verdict(),
                duration_ms = state.duration_ms(),
                tasks = state.task_count(),
                "Run finished"
            ),
        }

        self.event_bus.emit(ProgressEvent::RunFinished {
            flow_run_id: constants.flow_run_id.clone(),
            verdict: state.verdict(),
            duration_ms: state.duration_ms(),
            timestamp: Utc::now(),
        });
        state
    }
}

fn sample_kind(flow: &FlowVersion, name: &str) -> StepKind {
    if flow.trigger.name == name {
        return StepKind::Trigger;
    }
    flow.find_action(name)
        .map(|action| StepKind::from(action.action_type()))
        .unwrap_or(StepKind::Code)
}
