//! Standard block library
//!
//! Built-in integration actions, grouped by block

mod approval;
mod debug;
mod files;
mod flow;
mod http;
mod storage;
mod time;
mod transform;

pub use approval::WaitForApproval;
pub use debug::DebugLog;
pub use files::WriteFile;
pub use flow::{AddTag, ReturnResponse};
pub use http::HttpRequest;
pub use storage::{StorageDelete, StorageGet, StoragePut};
pub use time::Delay;
pub use transform::{JsonParse, JsonStringify};

use std::sync::Arc;
use stepruntime::BlockRegistry;

/// Version every built-in block is registered under
pub const BLOCK_VERSION: &str = "0.1.0";

/// Register all standard actions with a registry
pub fn register_all(registry: &mut BlockRegistry) {
    registry.register("approval", BLOCK_VERSION, Arc::new(WaitForApproval));
    registry.register("debug", BLOCK_VERSION, Arc::new(DebugLog));
    registry.register("files", BLOCK_VERSION, Arc::new(WriteFile));
    registry.register("flow", BLOCK_VERSION, Arc::new(ReturnResponse));
    registry.register("flow", BLOCK_VERSION, Arc::new(AddTag));
    registry.register("http", BLOCK_VERSION, Arc::new(HttpRequest::new()));
    registry.register("storage", BLOCK_VERSION, Arc::new(StoragePut));
    registry.register("storage", BLOCK_VERSION, Arc::new(StorageGet));
    registry.register("storage", BLOCK_VERSION, Arc::new(StorageDelete));
    registry.register("time", BLOCK_VERSION, Arc::new(Delay));
    registry.register("transform", BLOCK_VERSION, Arc::new(JsonParse));
    registry.register("transform", BLOCK_VERSION, Arc::new(JsonStringify));
}
