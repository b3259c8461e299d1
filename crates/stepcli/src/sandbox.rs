use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use stepcore::StepError;
use stepruntime::{CodeModuleRequest, CodeModuleRunner};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs each code step as a child process.
///
/// The step's inputs are written to stdin as JSON; whatever the process
/// prints to stdout is the step output (parsed as JSON when possible).
pub struct ProcessCodeRunner {
    interpreter: String,
}

impl ProcessCodeRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

#[async_trait]
impl CodeModuleRunner for ProcessCodeRunner {
    async fn run_code_module(&self, request: CodeModuleRequest) -> Result<Value, StepError> {
        let mut parts = self.interpreter.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| StepError::Execution("No interpreter configured".to_string()))?;

        debug!(
            "Running {} {} (fresh import: {})",
            program, request.code_file, request.is_fresh_import
        );
        let mut child = Command::new(program)
            .args(parts)
            .arg(&request.code_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StepError::Execution(format!("Failed to start {}: {}", program, e)))?;

        let input = serde_json::to_vec(&request.inputs)
            .map_err(|e| StepError::Execution(format!("Failed to encode inputs: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| StepError::Execution(format!("Failed to send inputs: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StepError::Execution(format!("Code step did not finish: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StepError::Execution(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}
