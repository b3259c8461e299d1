use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use stepcore::StepError;

/// Looks up stored connection credentials by name.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Value>, StepError>;
}

/// Connections known up front.
#[derive(Debug, Clone, Default)]
pub struct StaticConnections {
    connections: HashMap<String, Value>,
}

impl StaticConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, name: impl Into<String>, value: Value) -> Self {
        self.connections.insert(name.into(), value);
        self
    }
}

#[async_trait]
impl ConnectionResolver for StaticConnections {
    async fn get(&self, name: &str) -> Result<Option<Value>, StepError> {
        Ok(self.connections.get(name).cloned())
    }
}
