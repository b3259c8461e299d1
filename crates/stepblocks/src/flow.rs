use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use stepcore::{StepError, StopResponse};
use stepruntime::{
    ActionMetadata, BlockAction, BlockContext, BlockOutcome, PropertyDefinition, PropertySchema,
    PropertyType,
};

/// Stop the run and hand a response back to whoever triggered it
pub struct ReturnResponse;

#[async_trait]
impl BlockAction for ReturnResponse {
    fn name(&self) -> &str {
        "return_response"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "status".to_string(),
            PropertyDefinition::new("Status", PropertyType::Number).with_default(json!(200)),
        );
        props.insert("body".to_string(), PropertyDefinition::new("Body", PropertyType::Json));
        props.insert(
            "headers".to_string(),
            PropertyDefinition::new("Headers", PropertyType::Object),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Stop the flow and return a response".to_string(),
            category: "flow".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let status = ctx
            .props_value
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(200);
        let headers: BTreeMap<String, String> = match ctx.props_value.get("headers") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        let body = ctx.props_value.get("body").cloned().unwrap_or(Value::Null);

        Ok(ctx.stop(StopResponse {
            status,
            body,
            headers,
        }))
    }
}

/// Attach a tag to the run
pub struct AddTag;

#[async_trait]
impl BlockAction for AddTag {
    fn name(&self) -> &str {
        "add_tag"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "tag".to_string(),
            PropertyDefinition::new("Tag", PropertyType::ShortText).required(),
        );
        props
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let tag = ctx
            .prop_str("tag")
            .ok_or_else(|| StepError::InvalidInput {
                field: "tag".to_string(),
                message: "expected a string".to_string(),
            })?
            .to_string();
        ctx.add_tag(tag.clone());
        Ok(BlockOutcome::Completed(json!({ "tag": tag })))
    }
}
