use crate::{Action, ExecutionConstants, ProgressUpdateMode, ResumePayload, RetryPolicy};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The trigger heading a flow; its payload becomes the first step output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStep {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub next_action: Option<Arc<Action>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersion {
    pub id: String,
    pub flow_id: String,
    #[serde(default)]
    pub display_name: String,
    pub trigger: TriggerStep,
}

impl FlowVersion {
    pub fn first_action(&self) -> Option<Arc<Action>> {
        self.trigger.next_action.clone()
    }

    /// Locate a step anywhere in the graph, nested chains included.
    pub fn find_action(&self, name: &str) -> Option<&Action> {
        self.trigger.next_action.as_deref()?.find(name)
    }
}

/// Fields every operation shape carries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationBase {
    pub project_id: String,
    pub engine_token: String,
    pub public_api_url: String,
    pub internal_api_url: String,
    pub flow_version: FlowVersion,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteFlowOperation {
    #[serde(flatten)]
    pub base: OperationBase,
    pub flow_run_id: String,
    #[serde(default)]
    pub trigger_payload: Value,
    #[serde(default)]
    pub resume_payload: Option<ResumePayload>,
    #[serde(default)]
    pub progress_update_mode: ProgressUpdateMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStepOperation {
    #[serde(flatten)]
    pub base: OperationBase,
    pub step_name: String,
    /// Outputs of earlier steps to resolve the tested step's input against.
    #[serde(default)]
    pub sample_data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePropertyOperation {
    #[serde(flatten)]
    pub base: OperationBase,
    pub block_name: String,
    pub block_version: String,
    pub action_name: String,
    pub property_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerHookType {
    OnEnable,
    OnDisable,
    Run,
    Test,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTriggerOperation {
    #[serde(flatten)]
    pub base: OperationBase,
    pub hook_type: TriggerHookType,
    #[serde(default)]
    pub trigger_payload: Value,
}

/// The four shapes a caller can ask the engine to execute.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operationType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineOperation {
    ExecuteFlow(ExecuteFlowOperation),
    ExecuteStep(ExecuteStepOperation),
    ExecuteProperty(ExecutePropertyOperation),
    ExecuteTrigger(ExecuteTriggerOperation),
}

impl EngineOperation {
    pub fn base(&self) -> &OperationBase {
        match self {
            EngineOperation::ExecuteFlow(op) => &op.base,
            EngineOperation::ExecuteStep(op) => &op.base,
            EngineOperation::ExecuteProperty(op) => &op.base,
            EngineOperation::ExecuteTrigger(op) => &op.base,
        }
    }
}

impl ExecutionConstants {
    /// Build the constants for any operation shape.
    ///
    /// Only a full-flow run carries a run id and resume payload; the other
    /// shapes get a synthetic run id and run in single-step test mode.
    pub fn from_operation(
        operation: &EngineOperation,
        retry_policy: RetryPolicy,
        timeout: Duration,
        base_code_directory: &str,
    ) -> Self {
        let base = operation.base();
        let (run_id, resume_payload, progress, test_mode) = match operation {
            EngineOperation::ExecuteFlow(op) => (
                op.flow_run_id.clone(),
                op.resume_payload.clone(),
                op.progress_update_mode,
                false,
            ),
            EngineOperation::ExecuteStep(_)
            | EngineOperation::ExecuteProperty(_)
            | EngineOperation::ExecuteTrigger(_) => (
                format!("test-{}", uuid::Uuid::new_v4()),
                None,
                ProgressUpdateMode::None,
                true,
            ),
        };

        let mut constants = ExecutionConstants::new(run_id)
            .with_retry_policy(retry_policy)
            .with_timeout(timeout)
            .with_test_single_step_mode(test_mode)
            .with_progress_update_mode(progress);
        constants.resume_payload = resume_payload;
        constants.flow_id = base.flow_version.flow_id.clone();
        constants.flow_version_id = base.flow_version.id.clone();
        constants.project_id = base.project_id.clone();
        constants.public_api_url = base.public_api_url.clone();
        constants.internal_api_url = base.internal_api_url.clone();
        constants.engine_token = base.engine_token.clone();
        constants.base_code_directory = base_code_directory.to_string();
        constants
    }
}
