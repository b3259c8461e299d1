//! Step execution runtime
//!
//! This crate walks a flow's action chain: it dispatches every step to its
//! handler, evaluates branch and split conditions, fans loops out across
//! tasks, and applies retry and continue-on-failure policies. Everything
//! outside the engine (user code, integrations, storage, progress) is
//! reached through the collaborator traits exported here.

pub mod condition;
mod config;
mod connections;
mod context;
mod executor;
mod handlers;
mod progress;
mod registry;
mod runtime;
mod sandbox;
mod services;
mod store;
mod variables;

pub use config::RuntimeConfig;
pub use connections::{ConnectionResolver, StaticConnections};
pub use context::{BlockContext, BlockContextParts, BlockOutcome, PauseRequest};
pub use executor::FlowExecutor;
pub use handlers::loop_on_items::IterationRecord;
pub use progress::{BroadcastProgressReporter, NoopProgressReporter, ProgressReporter};
pub use registry::{ActionMetadata, BlockAction, BlockLoader, BlockRegistry, LoadedBlockAction};
pub use runtime::FlowRuntime;
pub use sandbox::{CodeModuleRequest, CodeModuleRunner, NoSandbox};
pub use services::{EngineServices, EngineServicesBuilder};
pub use store::{
    FileStore, InMemoryFileStore, InMemoryStore, KeyValueStore, ScopedStore, StoreScope,
};
pub use variables::{
    process_properties, Processed, PropertyDefinition, PropertySchema, PropertyType, Resolved,
    TemplateResolver, VariableResolver, REDACTED,
};
