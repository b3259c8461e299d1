use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use stepcore::{ExecutionState, StoreError};
use stepruntime::KeyValueStore;
use tokio::sync::Mutex;

pub fn state_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("{}.state.json", run_id))
}

pub fn store_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("{}.store.json", run_id))
}

pub async fn save_state(dir: &Path, run_id: &str, state: &ExecutionState) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = state_path(dir, run_id);
    tokio::fs::write(&path, serde_json::to_vec_pretty(state)?)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub async fn load_state(dir: &Path, run_id: &str) -> Result<ExecutionState> {
    let path = state_path(dir, run_id);
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("No paused run found at {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Corrupt run state in {}", path.display()))
}

pub async fn remove_state(dir: &Path, run_id: &str) -> Result<()> {
    match tokio::fs::remove_file(state_path(dir, run_id)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Key-value store persisted as one JSON object per file.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Value>>,
}

impl JsonFileStore {
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
                key: path.display().to_string(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::Backend(e.to_string())),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(entries).map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}
