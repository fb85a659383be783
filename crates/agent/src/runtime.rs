//! Everything sessions share: the graph, storage and the tool binding.

use std::sync::Arc;

use saferplaces_config::{AppConfig, StorageConfig};
use saferplaces_core::error::Error;
use saferplaces_core::provider::Provider;
use saferplaces_core::storage::{Checkpointer, ObjectStore};
use saferplaces_tools::{Assistant, ProcessClient, default_registry};
use tracing::info;

use crate::graph::Graph;

pub struct AgentRuntime {
    pub(crate) graph: Graph,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) checkpointer: Arc<dyn Checkpointer>,
    storage: StorageConfig,
    tool_binding: Option<Vec<String>>,
}

impl AgentRuntime {
    /// A runtime that binds every router tool on fresh threads.
    pub fn new(
        graph: Graph,
        store: Arc<dyn ObjectStore>,
        checkpointer: Arc<dyn Checkpointer>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            graph,
            store,
            checkpointer,
            storage,
            tool_binding: Some(Vec::new()),
        }
    }

    /// Tools bound on fresh threads: `Some([])` binds all of them, `None`
    /// none.
    pub fn with_tool_binding(mut self, binding: Option<Vec<String>>) -> Self {
        self.tool_binding = binding;
        self
    }

    /// Wire the default tool set, storage backend and limits from `config`.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>) -> Result<Self, Error> {
        let assistant = Assistant::new(provider.clone(), &config.default_model);
        let saferplaces = ProcessClient::new(&config.saferplaces_api);
        let safercast = ProcessClient::new(&config.safercast_api);
        let tools = default_registry(&assistant, &saferplaces, &safercast)?;

        let graph = Graph::new(provider, &config.default_model, tools, assistant)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_steps(config.agent.max_steps);
        let (store, checkpointer) = saferplaces_storage::build_from_config(&config.storage);
        info!(
            model = %config.default_model,
            store = store.name(),
            checkpointer = checkpointer.name(),
            "agent runtime ready"
        );

        Ok(Self::new(graph, store, checkpointer, config.storage.clone())
            .with_tool_binding(config.agent.tool_binding()))
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn tool_binding(&self) -> Option<Vec<String>> {
        self.tool_binding.clone()
    }

    pub fn project_bucket(&self, user_id: &str, project_id: &str) -> String {
        self.storage.project_bucket(user_id, project_id)
    }
}
