use async_trait::async_trait;
use serde_json::json;
use stepcore::StepError;
use stepruntime::{
    ActionMetadata, BlockAction, BlockContext, BlockOutcome, PropertyDefinition, PropertySchema,
    PropertyType,
};

/// Write text content to the run's file store
pub struct WriteFile;

#[async_trait]
impl BlockAction for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "fileName".to_string(),
            PropertyDefinition::new("File name", PropertyType::ShortText).required(),
        );
        props.insert(
            "content".to_string(),
            PropertyDefinition::new("Content", PropertyType::LongText).required(),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Create a file attached to the run".to_string(),
            category: "files".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let file_name = ctx.require_prop("fileName")?.as_str().unwrap_or_default().to_string();
        let content = match ctx.require_prop("content")? {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let size = content.len();
        let url = ctx.write_file(&file_name, content.into_bytes()).await?;
        Ok(BlockOutcome::Completed(json!({
            "fileName": file_name,
            "url": url,
            "size": size,
        })))
    }
}
