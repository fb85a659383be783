//! Tool registry: every agent tool, shared by all sessions.

use std::collections::HashMap;
use std::sync::Arc;

use saferplaces_core::error::ToolError;
use saferplaces_core::tool::AgentTool;

use crate::create_project::{OptionalLayerTool, SelectBuildingsTool, SelectDtmTool};
use crate::demo_weather::DemoWeatherTool;
use crate::flooding_rainfall::{DefineModelTool, DefineRainTool};
use crate::geospatial_ops::GeospatialOpsTool;
use crate::llm::Assistant;
use crate::remote::ProcessClient;
use crate::safercast_api::{DpcRetrieverTool, Icon2iIngestorTool, Icon2iRetrieverTool};
use crate::saferplaces_api::{DigitalTwinTool, SaferBuildingsTool, SaferRainTool};

/// Tools by name, in registration order.
///
/// Graph nodes look tools up here when they answer a tool call, and the
/// chatbot asks for definitions when binding tools to the model.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique across the whole tool set.
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The full SaferPlaces tool set.
pub fn default_registry(
    assistant: &Assistant,
    saferplaces: &ProcessClient,
    safercast: &ProcessClient,
) -> Result<ToolRegistry, ToolError> {
    let tools: Vec<Arc<dyn AgentTool>> = vec![
        Arc::new(DemoWeatherTool::new(assistant.clone())),
        Arc::new(SelectDtmTool::new(assistant.clone())),
        Arc::new(SelectBuildingsTool),
        Arc::new(OptionalLayerTool::infiltration()),
        Arc::new(OptionalLayerTool::lithology()),
        Arc::new(OptionalLayerTool::other_layers()),
        Arc::new(DefineRainTool),
        Arc::new(DefineModelTool),
        Arc::new(DigitalTwinTool::new(saferplaces.clone(), assistant.clone())),
        Arc::new(SaferRainTool::new(saferplaces.clone())),
        Arc::new(SaferBuildingsTool::new(saferplaces.clone())),
        Arc::new(DpcRetrieverTool::new(safercast.clone())),
        Arc::new(Icon2iIngestorTool::new(safercast.clone())),
        Arc::new(Icon2iRetrieverTool::new(safercast.clone())),
        Arc::new(GeospatialOpsTool::new(assistant.clone())),
    ];

    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool)?;
    }
    Ok(registry)
}
