use crate::connections::ConnectionResolver;
use crate::store::{FileStore, ScopedStore};
use serde_json::Value;
use std::sync::Arc;
use stepcore::{ExecutionType, ResumePayload, StepError, StepExecutionPath, StopResponse};

/// Result of running an integration action.
///
/// Stopping or pausing the run is expressed as a return value; nothing the
/// action does touches the execution state until it has returned.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Completed(Value),
    Stopped(StopResponse),
    Paused(PauseRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PauseRequest {
    /// Correlation id an external resume request must carry.
    pub request_id: String,
    pub metadata: Value,
}

/// Everything an integration action can see and use while it runs.
pub struct BlockContext {
    pub step_name: String,
    pub props_value: Value,
    pub execution_type: ExecutionType,
    pub resume_payload: Option<ResumePayload>,
    pub flow_id: String,
    pub flow_run_id: String,
    pub project_id: String,
    pub public_api_url: String,
    /// Ordered tag log, folded into the run after the action returns.
    pub tags: Vec<String>,
    path: StepExecutionPath,
    pause_id: Option<String>,
    store: ScopedStore,
    files: Arc<dyn FileStore>,
    connections: Arc<dyn ConnectionResolver>,
}

pub struct BlockContextParts {
    pub step_name: String,
    pub props_value: Value,
    pub execution_type: ExecutionType,
    pub resume_payload: Option<ResumePayload>,
    pub flow_id: String,
    pub flow_run_id: String,
    pub project_id: String,
    pub public_api_url: String,
    pub path: StepExecutionPath,
    pub pause_id: Option<String>,
    pub store: ScopedStore,
    pub files: Arc<dyn FileStore>,
    pub connections: Arc<dyn ConnectionResolver>,
}

impl BlockContext {
    pub fn new(parts: BlockContextParts) -> Self {
        Self {
            step_name: parts.step_name,
            props_value: parts.props_value,
            execution_type: parts.execution_type,
            resume_payload: parts.resume_payload,
            flow_id: parts.flow_id,
            flow_run_id: parts.flow_run_id,
            project_id: parts.project_id,
            public_api_url: parts.public_api_url,
            tags: Vec::new(),
            path: parts.path,
            pause_id: parts.pause_id,
            store: parts.store,
            files: parts.files,
            connections: parts.connections,
        }
    }

    /// Get a required prop or fail with an input error.
    pub fn require_prop(&self, name: &str) -> Result<&Value, StepError> {
        self.props_value
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| StepError::InvalidInput {
                field: name.to_string(),
                message: "missing required value".to_string(),
            })
    }

    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.props_value.get(name).and_then(Value::as_str)
    }

    pub fn store(&self) -> &ScopedStore {
        &self.store
    }

    pub async fn write_file(&self, file_name: &str, data: Vec<u8>) -> Result<String, StepError> {
        self.files
            .write(&self.flow_run_id, file_name, data)
            .await
            .map_err(|e| StepError::Execution(e.to_string()))
    }

    pub async fn connection(&self, name: &str) -> Result<Value, StepError> {
        self.connections
            .get(name)
            .await?
            .ok_or_else(|| StepError::ConnectionNotFound(name.to_string()))
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.push(tag.into());
    }

    pub fn path(&self) -> &StepExecutionPath {
        &self.path
    }

    /// Pause the run, correlated by the run's current pause id or a fresh one.
    pub fn pause(&self, metadata: Value) -> BlockOutcome {
        let request_id = self
            .pause_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.pause_with_request_id(metadata, request_id)
    }

    pub fn pause_with_request_id(&self, metadata: Value, request_id: impl Into<String>) -> BlockOutcome {
        BlockOutcome::Paused(PauseRequest {
            request_id: request_id.into(),
            metadata,
        })
    }

    pub fn stop(&self, response: StopResponse) -> BlockOutcome {
        BlockOutcome::Stopped(response)
    }

    /// URL an external caller hits to resume this exact paused frame.
    pub fn resume_url(&self, request_id: &str) -> String {
        let mut url = format!(
            "{}/v1/flow-runs/{}/requests/{}",
            self.public_api_url.trim_end_matches('/'),
            self.flow_run_id,
            request_id
        );
        if !self.path.is_empty() {
            url.push_str("?path=");
            url.push_str(&self.path.to_string());
        }
        url
    }
}
