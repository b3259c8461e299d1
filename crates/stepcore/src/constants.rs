use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Backoff for retryable step failures: attempt `n` failing waits
/// `base_interval_ms * exponential^n` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub exponential: u32,
    pub base_interval_ms: u64,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.exponential).saturating_pow(attempt);
        Duration::from_millis(self.base_interval_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            exponential: 2,
            base_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressUpdateMode {
    #[default]
    None,
    Continuous,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    #[default]
    Begin,
    Resume,
}

/// Inbound request that resumes a paused run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePayload {
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ResumePayload {
    /// Resume key of the paused frame this request targets.
    pub fn path(&self) -> Option<&str> {
        self.query_params.get("path").map(String::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.query_params.get("action").map(String::as_str)
    }
}

/// Immutable per-run configuration, built once by the caller.
#[derive(Debug, Clone)]
pub struct ExecutionConstants {
    pub flow_id: String,
    pub flow_version_id: String,
    pub flow_run_id: String,
    pub project_id: String,
    pub public_api_url: String,
    pub internal_api_url: String,
    pub engine_token: String,
    pub retry_policy: RetryPolicy,
    pub test_single_step_mode: bool,
    pub resume_payload: Option<ResumePayload>,
    pub progress_update_mode: ProgressUpdateMode,
    pub base_code_directory: String,
    pub timeout: Duration,
    pub started_at: Instant,
}

impl ExecutionConstants {
    pub fn new(flow_run_id: impl Into<String>) -> Self {
        Self {
            flow_id: String::new(),
            flow_version_id: String::new(),
            flow_run_id: flow_run_id.into(),
            project_id: String::new(),
            public_api_url: String::new(),
            internal_api_url: String::new(),
            engine_token: String::new(),
            retry_policy: RetryPolicy::default(),
            test_single_step_mode: false,
            resume_payload: None,
            progress_update_mode: ProgressUpdateMode::None,
            base_code_directory: "codes".to_string(),
            timeout: Duration::from_secs(600),
            started_at: Instant::now(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_resume_payload(mut self, payload: ResumePayload) -> Self {
        self.resume_payload = Some(payload);
        self
    }

    pub fn with_test_single_step_mode(mut self, enabled: bool) -> Self {
        self.test_single_step_mode = enabled;
        self
    }

    pub fn with_progress_update_mode(mut self, mode: ProgressUpdateMode) -> Self {
        self.progress_update_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `None` when the timeout reaches past what `Instant` can represent.
    pub fn deadline(&self) -> Option<Instant> {
        self.started_at.checked_add(self.timeout)
    }

    pub fn is_past_deadline(&self) -> bool {
        self.deadline().is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn execution_type(&self) -> ExecutionType {
        if self.resume_payload.is_some() {
            ExecutionType::Resume
        } else {
            ExecutionType::Begin
        }
    }

    /// Where the compiled module for `step_name` lives.
    pub fn code_file(&self, step_name: &str) -> String {
        format!(
            "{}/{}/{}/index.js",
            self.base_code_directory.trim_end_matches('/'),
            self.flow_version_id,
            step_name
        )
    }
}
