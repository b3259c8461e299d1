use async_trait::async_trait;
use serde_json::Value;
use stepcore::StepError;
use stepruntime::{
    ActionMetadata, BlockAction, BlockContext, BlockOutcome, PropertyDefinition, PropertySchema,
    PropertyType,
};

/// Parse a JSON string into a value
pub struct JsonParse;

#[async_trait]
impl BlockAction for JsonParse {
    fn name(&self) -> &str {
        "parse_json"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "json".to_string(),
            PropertyDefinition::new("JSON", PropertyType::LongText).required(),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let input = ctx
            .require_prop("json")?
            .as_str()
            .ok_or_else(|| StepError::InvalidInput {
                field: "json".to_string(),
                message: "expected a string".to_string(),
            })?;

        let parsed: Value = serde_json::from_str(input)
            .map_err(|e| StepError::Execution(format!("JSON parse error: {}", e)))?;

        Ok(BlockOutcome::Completed(parsed))
    }
}

/// Serialize any value to a JSON string
pub struct JsonStringify;

#[async_trait]
impl BlockAction for JsonStringify {
    fn name(&self) -> &str {
        "stringify_json"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "value".to_string(),
            PropertyDefinition::new("Value", PropertyType::Json).required(),
        );
        props.insert(
            "pretty".to_string(),
            PropertyDefinition::new("Pretty print", PropertyType::Checkbox)
                .with_default(Value::Bool(false)),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Convert a value to a JSON string".to_string(),
            category: "transform".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let value = ctx.require_prop("value")?;
        let pretty = ctx.props_value.get("pretty").and_then(Value::as_bool).unwrap_or(false);

        let json = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| StepError::Execution(format!("JSON stringify error: {}", e)))?;

        Ok(BlockOutcome::Completed(Value::String(json)))
    }
}
