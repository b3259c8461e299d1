use crate::context::{BlockContext, BlockOutcome};
use crate::variables::{PropertyDefinition, PropertySchema};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::StepError;

/// An integration action user flows can call from a Block step.
#[async_trait]
pub trait BlockAction: Send + Sync {
    /// Action identifier within its block (e.g. "parse_json")
    fn name(&self) -> &str;

    /// Declared input properties
    fn props(&self) -> PropertySchema {
        PropertySchema::new()
    }

    /// Optional: connection the action requires
    fn auth(&self) -> Option<PropertyDefinition> {
        None
    }

    /// Optional: description shown in listings
    fn metadata(&self) -> ActionMetadata {
        ActionMetadata::default()
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError>;
}

/// Metadata about an action
#[derive(Debug, Clone)]
pub struct ActionMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ActionMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// An action ready to run, with the schema its input is processed against.
#[derive(Clone)]
pub struct LoadedBlockAction {
    pub action: Arc<dyn BlockAction>,
    pub props: PropertySchema,
    pub auth: Option<PropertyDefinition>,
}

/// Resolves `(block, version, action)` to a runnable action.
#[async_trait]
pub trait BlockLoader: Send + Sync {
    async fn load(
        &self,
        block_name: &str,
        block_version: &str,
        action_name: &str,
    ) -> Result<LoadedBlockAction, StepError>;
}

struct BlockEntry {
    version: String,
    actions: HashMap<String, Arc<dyn BlockAction>>,
}

/// In-process registry of block actions
#[derive(Default)]
pub struct BlockRegistry {
    blocks: HashMap<String, BlockEntry>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under a block. Re-registering replaces the action.
    pub fn register(&mut self, block_name: &str, block_version: &str, action: Arc<dyn BlockAction>) {
        tracing::info!(
            "Registering block action: {}@{}/{}",
            block_name,
            block_version,
            action.name()
        );
        let entry = self
            .blocks
            .entry(block_name.to_string())
            .or_insert_with(|| BlockEntry {
                version: block_version.to_string(),
                actions: HashMap::new(),
            });
        entry.version = block_version.to_string();
        entry.actions.insert(action.name().to_string(), action);
    }

    /// `(block, version, action)` for every registered action, sorted.
    pub fn list_actions(&self) -> Vec<(String, String, String)> {
        let mut listed: Vec<_> = self
            .blocks
            .iter()
            .flat_map(|(block, entry)| {
                entry
                    .actions
                    .keys()
                    .map(move |action| (block.clone(), entry.version.clone(), action.clone()))
            })
            .collect();
        listed.sort();
        listed
    }

    pub fn get_metadata(&self, block_name: &str, action_name: &str) -> Option<ActionMetadata> {
        self.blocks
            .get(block_name)?
            .actions
            .get(action_name)
            .map(|a| a.metadata())
    }

    fn lookup(&self, block_name: &str, block_version: &str, action_name: &str) -> Option<Arc<dyn BlockAction>> {
        let entry = self.blocks.get(block_name)?;
        let version_matches = block_version.is_empty()
            || block_version == "latest"
            || entry.version == "*"
            || entry.version == block_version.trim_start_matches(['~', '^']);
        if !version_matches {
            return None;
        }
        entry.actions.get(action_name).cloned()
    }
}

#[async_trait]
impl BlockLoader for BlockRegistry {
    async fn load(
        &self,
        block_name: &str,
        block_version: &str,
        action_name: &str,
    ) -> Result<LoadedBlockAction, StepError> {
        let action = self
            .lookup(block_name, block_version, action_name)
            .ok_or_else(|| StepError::ActionNotFound {
                block: block_name.to_string(),
                version: block_version.to_string(),
                action: action_name.to_string(),
            })?;
        Ok(LoadedBlockAction {
            props: action.props(),
            auth: action.auth(),
            action,
        })
    }
}
