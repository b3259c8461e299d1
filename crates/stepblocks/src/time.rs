use async_trait::async_trait;
use serde_json::{json, Value};
use stepcore::StepError;
use stepruntime::{
    ActionMetadata, BlockAction, BlockContext, BlockOutcome, PropertyDefinition, PropertySchema,
    PropertyType,
};
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Delay the step for a number of milliseconds
pub struct Delay;

#[async_trait]
impl BlockAction for Delay {
    fn name(&self) -> &str {
        "delay"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "delay_ms".to_string(),
            PropertyDefinition::new("Delay (ms)", PropertyType::Number).with_default(json!(1000)),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let delay_ms = ctx
            .props_value
            .get("delay_ms")
            .and_then(Value::as_f64)
            .filter(|ms| *ms >= 0.0)
            .unwrap_or(1000.0) as u64;

        debug!(step = %ctx.step_name, "Delaying for {}ms", delay_ms);
        sleep(Duration::from_millis(delay_ms)).await;

        Ok(BlockOutcome::Completed(json!({ "delayedMs": delay_ms })))
    }
}
