use crate::path::{PathFrame, StepExecutionPath};
use crate::{ActionType, FailureKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Step outputs keyed by step name, in the order steps first ran.
pub type StepMap = IndexMap<String, StepOutput>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Recorded but not finished yet (a loop whose iterations are in flight).
    Running,
    Succeeded,
    Failed,
    Paused,
    Stopped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Stopped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Trigger,
    Code,
    Block,
    Branch,
    Split,
    LoopOnItems,
}

impl From<ActionType> for StepKind {
    fn from(value: ActionType) -> Self {
        match value {
            ActionType::Code => StepKind::Code,
            ActionType::Block => StepKind::Block,
            ActionType::Branch => StepKind::Branch,
            ActionType::Split => StepKind::Split,
            ActionType::LoopOnItems => StepKind::LoopOnItems,
        }
    }
}

/// Recorded result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub status: StepStatus,
    /// Censored input; secrets never reach the trace.
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Per-iteration step maps, loops only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iterations: Vec<StepMap>,
}

impl StepOutput {
    pub fn init(kind: StepKind, input: Value) -> Self {
        Self {
            kind,
            status: StepStatus::Running,
            input,
            output: None,
            error_message: None,
            duration_ms: None,
            iterations: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Loop bookkeeping: the current item and its 1-based index.
    pub fn with_item_and_index(mut self, item: Value, index: usize) -> Self {
        self.output = Some(json!({ "item": item, "index": index }));
        self
    }

    /// Make sure `iterations[index]` exists.
    pub fn ensure_iteration(mut self, index: usize) -> Self {
        while self.iterations.len() <= index {
            self.iterations.push(StepMap::new());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Running,
    Paused,
    Succeeded,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for StopResponse {
    fn default() -> Self {
        Self {
            status: 200,
            body: Value::Null,
            headers: BTreeMap::new(),
        }
    }
}

/// Reason and metadata attached to a non-RUNNING verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictResponse {
    #[serde(rename_all = "camelCase")]
    Paused {
        correlation_id: String,
        pause_metadata: Value,
    },
    #[serde(rename_all = "camelCase")]
    Stopped { response: StopResponse },
    #[serde(rename_all = "camelCase")]
    Failed {
        kind: FailureKind,
        step_name: Option<String>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Succeeded { output: Option<Value> },
}

/// Copy-on-write snapshot of one run.
///
/// Every transform consumes the state and returns a new one; shared maps are
/// cloned only when a snapshot that still has other owners is modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    steps: Arc<StepMap>,
    verdict: Verdict,
    verdict_response: Option<VerdictResponse>,
    current_path: StepExecutionPath,
    pause_id: Option<String>,
    tags: Arc<Vec<String>>,
    duration_ms: u64,
    task_count: u64,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            steps: Arc::new(StepMap::new()),
            verdict: Verdict::Running,
            verdict_response: None,
            current_path: StepExecutionPath::empty(),
            pause_id: None,
            tags: Arc::new(Vec::new()),
            duration_ms: 0,
            task_count: 0,
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn is_running(&self) -> bool {
        self.verdict == Verdict::Running
    }

    pub fn verdict_response(&self) -> Option<&VerdictResponse> {
        self.verdict_response.as_ref()
    }

    pub fn current_path(&self) -> &StepExecutionPath {
        &self.current_path
    }

    pub fn pause_id(&self) -> Option<&str> {
        self.pause_id.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn task_count(&self) -> u64 {
        self.task_count
    }

    /// Top-level step map, independent of the current path.
    pub fn steps(&self) -> &StepMap {
        &self.steps
    }

    /// Step map addressed by the current path.
    pub fn steps_at_path(&self) -> Option<&StepMap> {
        map_at(&self.steps, self.current_path.frames())
    }

    pub fn get_step_output(&self, name: &str) -> Option<&StepOutput> {
        self.steps_at_path()?.get(name)
    }

    /// True iff the step at the current path has a terminal status.
    pub fn is_completed(&self, name: &str) -> bool {
        self.get_step_output(name)
            .is_some_and(|step| step.status.is_terminal())
    }

    pub fn is_paused(&self, name: &str) -> bool {
        self.get_step_output(name)
            .is_some_and(|step| step.status == StepStatus::Paused)
    }

    /// Steps visible from the current path: outer steps first, then each
    /// enclosing iteration's steps, innermost last.
    pub fn steps_in_scope(&self) -> Vec<(&str, &StepOutput)> {
        let mut visible = Vec::new();
        let mut map: &StepMap = &self.steps;
        visible.extend(map.iter().map(|(k, v)| (k.as_str(), v)));
        for frame in self.current_path.frames() {
            match map
                .get(&frame.loop_name)
                .and_then(|step| step.iterations.get(frame.iteration))
            {
                Some(inner) => {
                    visible.extend(inner.iter().map(|(k, v)| (k.as_str(), v)));
                    map = inner;
                }
                None => break,
            }
        }
        visible
    }

    /// Insert or replace a step at the current path. Other steps are untouched.
    pub fn upsert_step(mut self, name: impl Into<String>, output: StepOutput) -> Self {
        let frames = self.current_path.frames().to_vec();
        let map = map_at_mut(Arc::make_mut(&mut self.steps), &frames);
        map.insert(name.into(), output);
        self
    }

    /// Steps recorded in `iterations[index]` of `loop_name` at the current path.
    pub fn iteration_steps(&self, loop_name: &str, index: usize) -> Option<&StepMap> {
        self.get_step_output(loop_name)?.iterations.get(index)
    }

    /// Replace `iterations[index]` of `loop_name` at the current path.
    pub fn set_iteration_steps(self, loop_name: &str, index: usize, steps: StepMap) -> Self {
        let frames = self
            .current_path
            .loop_iteration(loop_name, index)
            .frames()
            .to_vec();
        let mut state = self;
        let map = map_at_mut(Arc::make_mut(&mut state.steps), &frames);
        *map = steps;
        state
    }

    pub fn set_verdict(mut self, verdict: Verdict, response: Option<VerdictResponse>) -> Self {
        self.verdict = verdict;
        self.verdict_response = response;
        self
    }

    /// Mark the run FAILED with a readable message.
    pub fn fail(self, kind: FailureKind, step_name: Option<&str>, message: impl Into<String>) -> Self {
        self.set_verdict(
            Verdict::Failed,
            Some(VerdictResponse::Failed {
                kind,
                step_name: step_name.map(str::to_string),
                message: message.into(),
            }),
        )
    }

    pub fn set_current_path(mut self, path: StepExecutionPath) -> Self {
        self.current_path = path;
        self
    }

    pub fn set_pause_id(mut self, pause_id: impl Into<String>) -> Self {
        self.pause_id = Some(pause_id.into());
        self
    }

    pub fn add_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target = Arc::make_mut(&mut self.tags);
        for tag in tags {
            let tag = tag.into();
            if !target.contains(&tag) {
                target.push(tag);
            }
        }
        self
    }

    pub fn set_step_duration(mut self, name: &str, duration_ms: u64) -> Self {
        let frames = self.current_path.frames().to_vec();
        let map = map_at_mut(Arc::make_mut(&mut self.steps), &frames);
        if let Some(step) = map.get_mut(name) {
            step.duration_ms = Some(duration_ms);
        }
        self
    }

    pub fn increase_task(self) -> Self {
        self.increase_tasks(1)
    }

    pub fn increase_tasks(mut self, count: u64) -> Self {
        self.task_count += count;
        self
    }

    pub fn set_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

fn map_at<'a>(root: &'a StepMap, frames: &[PathFrame]) -> Option<&'a StepMap> {
    let mut current = root;
    for frame in frames {
        current = current
            .get(&frame.loop_name)?
            .iterations
            .get(frame.iteration)?;
    }
    Some(current)
}

fn map_at_mut<'a>(root: &'a mut StepMap, frames: &[PathFrame]) -> &'a mut StepMap {
    let mut current = root;
    for frame in frames {
        let step = current
            .entry(frame.loop_name.clone())
            .or_insert_with(|| StepOutput::init(StepKind::LoopOnItems, Value::Null));
        while step.iterations.len() <= frame.iteration {
            step.iterations.push(StepMap::new());
        }
        current = &mut step.iterations[frame.iteration];
    }
    current
}
