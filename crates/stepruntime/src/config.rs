use stepcore::{EngineOperation, ExecutionConstants, RetryPolicy};
use std::time::Duration;

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub execution_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub event_buffer_size: usize,
    pub base_code_directory: String,
    /// Prefix of every loop-store key.
    pub loop_store_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(600),
            retry_policy: RetryPolicy::default(),
            event_buffer_size: 1000,
            base_code_directory: "codes".to_string(),
            loop_store_prefix: "loops".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `STEP_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, "STEP_EXECUTION_TIMEOUT_SECONDS") {
            config.execution_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var(&lookup, "STEP_RETRY_MAX_ATTEMPTS") {
            config.retry_policy.max_attempts = attempts;
        }
        if let Some(exponential) = parse_var(&lookup, "STEP_RETRY_EXPONENTIAL") {
            config.retry_policy.exponential = exponential;
        }
        if let Some(interval) = parse_var(&lookup, "STEP_RETRY_INTERVAL_MS") {
            config.retry_policy.base_interval_ms = interval;
        }
        if let Some(size) = parse_var(&lookup, "STEP_EVENT_BUFFER_SIZE") {
            config.event_buffer_size = size;
        }
        if let Some(dir) = lookup("STEP_CODE_DIRECTORY") {
            config.base_code_directory = dir;
        }

        config
    }

    pub fn constants_for(&self, operation: &EngineOperation) -> ExecutionConstants {
        ExecutionConstants::from_operation(
            operation,
            self.retry_policy,
            self.execution_timeout,
            &self.base_code_directory,
        )
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
