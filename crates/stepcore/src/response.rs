use crate::{ExecutionState, FailureKind, StepMap, StopResponse, Verdict, VerdictResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseInfo {
    pub execution_correlation_id: String,
    pub pause_metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub step_name: Option<String>,
    pub message: String,
}

/// What a caller receives once the engine returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRunResponse {
    pub verdict: Verdict,
    pub steps: StepMap,
    pub duration_ms: u64,
    pub tasks: u64,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<PauseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_response: Option<StopResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl From<&ExecutionState> for FlowRunResponse {
    fn from(state: &ExecutionState) -> Self {
        let mut response = FlowRunResponse {
            verdict: state.verdict(),
            steps: state.steps().clone(),
            duration_ms: state.duration_ms(),
            tasks: state.task_count(),
            tags: state.tags().to_vec(),
            pause: None,
            stop_response: None,
            error: None,
        };

        match state.verdict_response() {
            Some(VerdictResponse::Paused {
                correlation_id,
                pause_metadata,
            }) => {
                response.pause = Some(PauseInfo {
                    execution_correlation_id: correlation_id.clone(),
                    pause_metadata: pause_metadata.clone(),
                });
            }
            Some(VerdictResponse::Stopped { response: stop }) => {
                response.stop_response = Some(stop.clone());
            }
            Some(VerdictResponse::Failed {
                kind,
                step_name,
                message,
            }) => {
                response.error = Some(FailureInfo {
                    kind: *kind,
                    step_name: step_name.clone(),
                    message: message.clone(),
                });
            }
            Some(VerdictResponse::Succeeded { .. }) | None => {}
        }

        response
    }
}
