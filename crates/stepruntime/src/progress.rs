use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use stepcore::{EventBus, ExecutionConstants, ExecutionState, FlowRunResponse, ProgressError, ProgressEvent};

/// One-shot progress callback fired between top-level steps.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, state: &ExecutionState, constants: &ExecutionConstants) -> Result<(), ProgressError>;
}

pub struct NoopProgressReporter;

#[async_trait]
impl ProgressReporter for NoopProgressReporter {
    async fn report(&self, _state: &ExecutionState, _constants: &ExecutionConstants) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// Publishes snapshots on an [`EventBus`].
pub struct BroadcastProgressReporter {
    bus: Arc<EventBus>,
}

impl BroadcastProgressReporter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[async_trait]
impl ProgressReporter for BroadcastProgressReporter {
    async fn report(&self, state: &ExecutionState, constants: &ExecutionConstants) -> Result<(), ProgressError> {
        self.bus.emit(ProgressEvent::RunProgress {
            flow_run_id: constants.flow_run_id.clone(),
            snapshot: Box::new(FlowRunResponse::from(state)),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
