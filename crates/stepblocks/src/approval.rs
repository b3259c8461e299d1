//! Human-in-the-loop approval.
//!
//! The first run pauses and hands out approve/disapprove links; the resumed
//! run reads which link was followed from the resume request.

use async_trait::async_trait;
use serde_json::json;
use stepcore::{ExecutionType, StepError};
use stepruntime::{ActionMetadata, BlockAction, BlockContext, BlockOutcome};

pub struct WaitForApproval;

#[async_trait]
impl BlockAction for WaitForApproval {
    fn name(&self) -> &str {
        "wait_for_approval"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Pause the run until someone approves or disapproves".to_string(),
            category: "approval".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        match ctx.execution_type {
            ExecutionType::Begin => {
                let request_id = uuid::Uuid::new_v4().to_string();
                let base = ctx.resume_url(&request_id);
                let separator = if base.contains('?') { '&' } else { '?' };
                let metadata = json!({
                    "type": "WEBHOOK",
                    "approvalLink": format!("{}{}action=approve", base, separator),
                    "disapprovalLink": format!("{}{}action=disapprove", base, separator),
                });
                Ok(ctx.pause_with_request_id(metadata, request_id))
            }
            ExecutionType::Resume => {
                let action = ctx
                    .resume_payload
                    .as_ref()
                    .and_then(|payload| payload.action())
                    .unwrap_or_default();
                Ok(BlockOutcome::Completed(json!({ "approved": action == "approve" })))
            }
        }
    }
}
