use async_trait::async_trait;
use serde_json::{json, Value};
use stepcore::StepError;
use stepruntime::{
    ActionMetadata, BlockAction, BlockContext, BlockOutcome, PropertyDefinition, PropertySchema,
    PropertyType,
};
use tracing::info;

/// Logs its inputs and echoes the message back
pub struct DebugLog;

#[async_trait]
impl BlockAction for DebugLog {
    fn name(&self) -> &str {
        "log"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "message".to_string(),
            PropertyDefinition::new("Message", PropertyType::LongText),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let message = ctx.prop_str("message").unwrap_or("(no message)").to_string();
        info!(step = %ctx.step_name, "DEBUG: {}", message);

        if let Value::Object(props) = &ctx.props_value {
            for (key, value) in props {
                info!(step = %ctx.step_name, "  {}: {}", key, value);
            }
        }

        Ok(BlockOutcome::Completed(json!({ "message": message })))
    }
}
