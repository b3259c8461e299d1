use async_trait::async_trait;
use serde_json::Value;
use stepcore::StepError;

/// Request to run one compiled code module.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeModuleRequest {
    pub code_file: String,
    /// Bypass any module cache and load the file again.
    pub is_fresh_import: bool,
    pub inputs: Value,
}

/// Runs user code in whatever sandbox the host process provides.
#[async_trait]
pub trait CodeModuleRunner: Send + Sync {
    async fn run_code_module(&self, request: CodeModuleRequest) -> Result<Value, StepError>;
}

/// Runner for hosts without a sandbox; every invocation fails.
pub struct NoSandbox;

#[async_trait]
impl CodeModuleRunner for NoSandbox {
    async fn run_code_module(&self, request: CodeModuleRequest) -> Result<Value, StepError> {
        Err(StepError::Execution(format!(
            "No code sandbox is configured; cannot run {}",
            request.code_file
        )))
    }
}
