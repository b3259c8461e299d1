//! Core data model for the step engine
//!
//! Action graph, copy-on-write execution state, nested-loop paths, per-run
//! constants and the error taxonomy. Everything here is a plain value; the
//! execution machinery lives in `stepruntime`.

mod action;
mod constants;
mod error;
pub mod events;
mod operation;
mod path;
mod response;
mod state;

pub use action::{
    Action, ActionKind, ActionType, BlockStep, BranchStep, CodeStep, ErrorHandlingOptions,
    LoopStep, RawAction, SplitBranch, SplitOption, SplitStep,
};
pub use constants::{
    ExecutionConstants, ExecutionType, ProgressUpdateMode, ResumePayload, RetryPolicy,
};
pub use error::{
    ConditionError, EngineError, FailureKind, ProgressError, StepError, StoreError,
};
pub use events::{EventBus, ProgressEvent};
pub use operation::{
    EngineOperation, ExecuteFlowOperation, ExecutePropertyOperation, ExecuteStepOperation,
    ExecuteTriggerOperation, FlowVersion, OperationBase, TriggerHookType, TriggerStep,
};
pub use path::{PathFrame, StepExecutionPath, FRAME_SEPARATOR, PATH_SEPARATOR};
pub use response::{FailureInfo, FlowRunResponse, PauseInfo};
pub use state::{
    ExecutionState, StepKind, StepMap, StepOutput, StepStatus, StopResponse, Verdict,
    VerdictResponse,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
