use crate::{FlowRunResponse, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published while a run progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    RunProgress {
        flow_run_id: String,
        snapshot: Box<FlowRunResponse>,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        flow_run_id: String,
        verdict: Verdict,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn flow_run_id(&self) -> &str {
        match self {
            ProgressEvent::RunProgress { flow_run_id, .. }
            | ProgressEvent::RunFinished { flow_run_id, .. } => flow_run_id,
        }
    }
}

/// Fan-out channel for progress events. Sending with no subscribers is not
/// an error.
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}
