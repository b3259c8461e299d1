use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::StoreError;
use tokio::sync::RwLock;

/// Key/value storage shared by the loop handler and block actions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, Value>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Visibility of values a block action stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreScope {
    /// Shared by every run of the flow.
    Flow,
    /// Private to the current run.
    #[default]
    Run,
}

/// A view of a [`KeyValueStore`] that prefixes keys with a flow or run scope.
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn KeyValueStore>,
    flow_id: String,
    flow_run_id: String,
}

impl ScopedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, flow_id: impl Into<String>, flow_run_id: impl Into<String>) -> Self {
        Self {
            inner,
            flow_id: flow_id.into(),
            flow_run_id: flow_run_id.into(),
        }
    }

    fn scoped_key(&self, key: &str, scope: StoreScope) -> String {
        match scope {
            StoreScope::Flow => format!("flow_{}/{}", self.flow_id, key),
            StoreScope::Run => format!("run_{}/{}", self.flow_run_id, key),
        }
    }

    pub async fn get(&self, key: &str, scope: StoreScope) -> Result<Option<Value>, StoreError> {
        self.inner.get(&self.scoped_key(key, scope)).await
    }

    pub async fn put(&self, key: &str, value: Value, scope: StoreScope) -> Result<(), StoreError> {
        self.inner.put(&self.scoped_key(key, scope), value).await
    }

    pub async fn delete(&self, key: &str, scope: StoreScope) -> Result<(), StoreError> {
        self.inner.delete(&self.scoped_key(key, scope)).await
    }
}

/// File attachments written by block actions.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `data` and return a URL the run output can reference.
    async fn write(&self, flow_run_id: &str, file_name: &str, data: Vec<u8>) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryFileStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self, url: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(url).cloned()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn write(&self, flow_run_id: &str, file_name: &str, data: Vec<u8>) -> Result<String, StoreError> {
        let url = format!("memory://{}/{}/{}", flow_run_id, uuid::Uuid::new_v4(), file_name);
        self.files.write().await.insert(url.clone(), data);
        Ok(url)
    }
}
