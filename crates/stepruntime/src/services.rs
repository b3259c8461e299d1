use crate::connections::{ConnectionResolver, StaticConnections};
use crate::progress::{NoopProgressReporter, ProgressReporter};
use crate::registry::{BlockLoader, BlockRegistry};
use crate::sandbox::{CodeModuleRunner, NoSandbox};
use crate::store::{FileStore, InMemoryFileStore, InMemoryStore, KeyValueStore};
use crate::variables::{TemplateResolver, VariableResolver};
use std::sync::Arc;

/// External collaborators the engine calls out to.
///
/// Constructed once by the host process and shared by every run.
#[derive(Clone)]
pub struct EngineServices {
    pub resolver: Arc<dyn VariableResolver>,
    pub code_runner: Arc<dyn CodeModuleRunner>,
    pub blocks: Arc<dyn BlockLoader>,
    pub store: Arc<dyn KeyValueStore>,
    pub files: Arc<dyn FileStore>,
    pub connections: Arc<dyn ConnectionResolver>,
    pub progress: Arc<dyn ProgressReporter>,
    pub loop_store_prefix: String,
}

impl EngineServices {
    pub fn builder() -> EngineServicesBuilder {
        EngineServicesBuilder::default()
    }
}

impl Default for EngineServices {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Default)]
pub struct EngineServicesBuilder {
    resolver: Option<Arc<dyn VariableResolver>>,
    code_runner: Option<Arc<dyn CodeModuleRunner>>,
    blocks: Option<Arc<dyn BlockLoader>>,
    store: Option<Arc<dyn KeyValueStore>>,
    files: Option<Arc<dyn FileStore>>,
    connections: Option<Arc<dyn ConnectionResolver>>,
    progress: Option<Arc<dyn ProgressReporter>>,
    loop_store_prefix: Option<String>,
}

impl EngineServicesBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn VariableResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn code_runner(mut self, runner: Arc<dyn CodeModuleRunner>) -> Self {
        self.code_runner = Some(runner);
        self
    }

    pub fn blocks(mut self, blocks: Arc<dyn BlockLoader>) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn connections(mut self, connections: Arc<dyn ConnectionResolver>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn loop_store_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.loop_store_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> EngineServices {
        let connections: Arc<dyn ConnectionResolver> = self
            .connections
            .unwrap_or_else(|| Arc::new(StaticConnections::new()));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(TemplateResolver::new(connections.clone())));

        EngineServices {
            resolver,
            code_runner: self.code_runner.unwrap_or_else(|| Arc::new(NoSandbox)),
            blocks: self.blocks.unwrap_or_else(|| Arc::new(BlockRegistry::new())),
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            files: self.files.unwrap_or_else(|| Arc::new(InMemoryFileStore::new())),
            connections,
            progress: self.progress.unwrap_or_else(|| Arc::new(NoopProgressReporter)),
            loop_store_prefix: self.loop_store_prefix.unwrap_or_else(|| "loops".to_string()),
        }
    }
}
