use async_trait::async_trait;
use serde_json::{json, Value};
use stepcore::StepError;
use stepruntime::{
    ActionMetadata, BlockAction, BlockContext, BlockOutcome, PropertyDefinition, PropertySchema,
    PropertyType, StoreScope,
};

fn key_props() -> PropertySchema {
    let mut props = PropertySchema::new();
    props.insert(
        "key".to_string(),
        PropertyDefinition::new("Key", PropertyType::ShortText).required(),
    );
    props.insert(
        "scope".to_string(),
        PropertyDefinition::new("Scope", PropertyType::Dropdown).with_default(json!("RUN")),
    );
    props
}

fn key_and_scope(ctx: &BlockContext) -> Result<(String, StoreScope), StepError> {
    let key = ctx
        .prop_str("key")
        .filter(|k| !k.is_empty())
        .ok_or_else(|| StepError::InvalidInput {
            field: "key".to_string(),
            message: "expected a non-empty string".to_string(),
        })?
        .to_string();
    let scope = match ctx.props_value.get("scope") {
        None | Some(Value::Null) => StoreScope::default(),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| StepError::InvalidInput {
            field: "scope".to_string(),
            message: format!("expected FLOW or RUN, got {}", raw),
        })?,
    };
    Ok((key, scope))
}

fn storage_metadata(description: &str) -> ActionMetadata {
    ActionMetadata {
        description: description.to_string(),
        category: "storage".to_string(),
    }
}

/// Store a value under a key
pub struct StoragePut;

#[async_trait]
impl BlockAction for StoragePut {
    fn name(&self) -> &str {
        "put"
    }

    fn props(&self) -> PropertySchema {
        let mut props = key_props();
        props.insert("value".to_string(), PropertyDefinition::new("Value", PropertyType::Json));
        props
    }

    fn metadata(&self) -> ActionMetadata {
        storage_metadata("Store a value in the flow or run store")
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let (key, scope) = key_and_scope(ctx)?;
        let value = ctx.props_value.get("value").cloned().unwrap_or(Value::Null);
        ctx.store()
            .put(&key, value.clone(), scope)
            .await
            .map_err(|e| StepError::Execution(e.to_string()))?;
        Ok(BlockOutcome::Completed(json!({ "key": key, "value": value })))
    }
}

/// Read a value, or the default when the key is absent
pub struct StorageGet;

#[async_trait]
impl BlockAction for StorageGet {
    fn name(&self) -> &str {
        "get"
    }

    fn props(&self) -> PropertySchema {
        let mut props = key_props();
        props.insert(
            "defaultValue".to_string(),
            PropertyDefinition::new("Default value", PropertyType::Json),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        storage_metadata("Read a value from the flow or run store")
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let (key, scope) = key_and_scope(ctx)?;
        let stored = ctx
            .store()
            .get(&key, scope)
            .await
            .map_err(|e| StepError::Execution(e.to_string()))?;
        let value = stored
            .or_else(|| ctx.props_value.get("defaultValue").cloned())
            .unwrap_or(Value::Null);
        Ok(BlockOutcome::Completed(value))
    }
}

pub struct StorageDelete;

#[async_trait]
impl BlockAction for StorageDelete {
    fn name(&self) -> &str {
        "delete"
    }

    fn props(&self) -> PropertySchema {
        key_props()
    }

    fn metadata(&self) -> ActionMetadata {
        storage_metadata("Remove a value from the flow or run store")
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let (key, scope) = key_and_scope(ctx)?;
        let previous = ctx
            .store()
            .get(&key, scope)
            .await
            .map_err(|e| StepError::Execution(e.to_string()))?;
        ctx.store()
            .delete(&key, scope)
            .await
            .map_err(|e| StepError::Execution(e.to_string()))?;
        Ok(BlockOutcome::Completed(previous.unwrap_or(Value::Null)))
    }
}
