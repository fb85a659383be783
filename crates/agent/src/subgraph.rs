//! Subgraph wiring: which tools each subgraph owns and how the chatbot
//! reaches it.
//!
//! Single-shot subgraphs are a tool handler plus its interrupt node; the
//! chatbot forwards its tool-call message straight to the handler. Pipeline
//! subgraphs start at a MAIN node that walks a fixed sequence of runners,
//! each of which feeds one sub-tool call to the shared handler.

use saferplaces_core::names;
use saferplaces_core::provider::ToolDefinition;
use serde_json::json;

use crate::graph::NodeId;

/// One step of a pipeline: the sub-tool and the runner node that calls it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStep {
    pub tool: &'static str,
    pub runner: NodeId,
}

/// A multi-step tool pipeline.
#[derive(Debug)]
pub struct Pipeline {
    pub main: NodeId,
    /// Handler shared by every step.
    pub handler: NodeId,
    /// Router-facing tool that opens the pipeline.
    pub interface_tool: &'static str,
    /// `user_request` reported in the consolidated interface call.
    pub summary: &'static str,
    pub steps: &'static [PipelineStep],
}

impl Pipeline {
    /// Runner that follows `tool`, or MAIN after the last step.
    pub fn next_after(&self, tool: &str) -> NodeId {
        self.steps
            .iter()
            .position(|s| s.tool == tool)
            .and_then(|i| self.steps.get(i + 1))
            .map(|s| s.runner)
            .unwrap_or(self.main)
    }

    pub fn step_for_runner(&self, runner: NodeId) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.runner == runner)
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.steps.iter().any(|s| s.tool == tool)
    }
}

pub static CREATE_PROJECT: Pipeline = Pipeline {
    main: NodeId::CreateProjectMain,
    handler: NodeId::CreateProjectToolHandler,
    interface_tool: names::CREATE_PROJECT_SUBGRAPH_INTERFACE_TOOL,
    summary: "create a new project",
    steps: &[
        PipelineStep {
            tool: names::CREATE_PROJECT_SELECT_DTM_TOOL,
            runner: NodeId::SelectDtmRunner,
        },
        PipelineStep {
            tool: names::CREATE_PROJECT_SELECT_BUILDINGS_TOOL,
            runner: NodeId::SelectBuildingsRunner,
        },
        PipelineStep {
            tool: names::CREATE_PROJECT_SELECT_INFILTRATION_TOOL,
            runner: NodeId::SelectInfiltrationRunner,
        },
        PipelineStep {
            tool: names::CREATE_PROJECT_SELECT_LITHOLOGY_TOOL,
            runner: NodeId::SelectLithologyRunner,
        },
        PipelineStep {
            tool: names::CREATE_PROJECT_SELECT_OTHER_LAYERS_TOOL,
            runner: NodeId::SelectOtherLayersRunner,
        },
    ],
};

pub static FLOODING_RAINFALL: Pipeline = Pipeline {
    main: NodeId::FloodingRainfallMain,
    handler: NodeId::FloodingRainfallToolHandler,
    interface_tool: names::FLOODING_RAINFALL_SUBGRAPH_INTERFACE_TOOL,
    summary: "run a flooding rainfall simulation",
    steps: &[
        PipelineStep {
            tool: names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL,
            runner: NodeId::DefineRainRunner,
        },
        PipelineStep {
            tool: names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL,
            runner: NodeId::DefineModelRunner,
        },
    ],
};

/// The subgraphs nested under the chatbot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subgraph {
    Demo,
    CreateProject,
    FloodingRainfall,
    SaferplacesApi,
    SafercastApi,
    GeospatialOps,
}

impl Subgraph {
    pub const ALL: [Subgraph; 6] = [
        Subgraph::Demo,
        Subgraph::CreateProject,
        Subgraph::FloodingRainfall,
        Subgraph::SaferplacesApi,
        Subgraph::SafercastApi,
        Subgraph::GeospatialOps,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Subgraph::Demo => names::DEMO_SUBGRAPH,
            Subgraph::CreateProject => names::CREATE_PROJECT_SUBGRAPH,
            Subgraph::FloodingRainfall => names::FLOODING_RAINFALL_SUBGRAPH,
            Subgraph::SaferplacesApi => names::SAFERPLACES_API_SUBGRAPH,
            Subgraph::SafercastApi => names::SAFERCAST_API_SUBGRAPH,
            Subgraph::GeospatialOps => names::GEOSPATIAL_OPS_SUBGRAPH,
        }
    }

    pub fn handler(self) -> NodeId {
        match self {
            Subgraph::Demo => NodeId::DemoToolHandler,
            Subgraph::CreateProject => NodeId::CreateProjectToolHandler,
            Subgraph::FloodingRainfall => NodeId::FloodingRainfallToolHandler,
            Subgraph::SaferplacesApi => NodeId::SaferplacesApiToolHandler,
            Subgraph::SafercastApi => NodeId::SafercastApiToolHandler,
            Subgraph::GeospatialOps => NodeId::GeospatialOpsToolHandler,
        }
    }

    pub fn interrupt(self) -> NodeId {
        match self {
            Subgraph::Demo => NodeId::DemoToolInterrupt,
            Subgraph::CreateProject => NodeId::CreateProjectToolInterrupt,
            Subgraph::FloodingRainfall => NodeId::FloodingRainfallToolInterrupt,
            Subgraph::SaferplacesApi => NodeId::SaferplacesApiToolInterrupt,
            Subgraph::SafercastApi => NodeId::SafercastApiToolInterrupt,
            Subgraph::GeospatialOps => NodeId::GeospatialOpsToolInterrupt,
        }
    }

    pub fn pipeline(self) -> Option<&'static Pipeline> {
        match self {
            Subgraph::CreateProject => Some(&CREATE_PROJECT),
            Subgraph::FloodingRainfall => Some(&FLOODING_RAINFALL),
            _ => None,
        }
    }

    /// First node run when the chatbot routes here.
    pub fn entry(self) -> NodeId {
        self.pipeline().map(|p| p.main).unwrap_or(self.handler())
    }

    /// Pipelines build their own tool calls, so the chatbot's message is
    /// dropped rather than forwarded.
    pub fn forwards_message(self) -> bool {
        self.pipeline().is_none()
    }

    /// Agent tools the handler of this subgraph may run.
    pub fn tools(self) -> &'static [&'static str] {
        match self {
            Subgraph::Demo => &[names::DEMO_WEATHER_TOOL],
            Subgraph::CreateProject => &[
                names::CREATE_PROJECT_SELECT_DTM_TOOL,
                names::CREATE_PROJECT_SELECT_BUILDINGS_TOOL,
                names::CREATE_PROJECT_SELECT_INFILTRATION_TOOL,
                names::CREATE_PROJECT_SELECT_LITHOLOGY_TOOL,
                names::CREATE_PROJECT_SELECT_OTHER_LAYERS_TOOL,
            ],
            Subgraph::FloodingRainfall => &[
                names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL,
                names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL,
            ],
            Subgraph::SaferplacesApi => &[
                names::DIGITAL_TWIN_TOOL,
                names::SAFER_RAIN_TOOL,
                names::SAFERBUILDINGS_TOOL,
            ],
            Subgraph::SafercastApi => &[
                names::DPC_RETRIEVER_TOOL,
                names::ICON2I_INGESTOR_TOOL,
                names::ICON2I_RETRIEVER_TOOL,
            ],
            Subgraph::GeospatialOps => &[names::GEOSPATIAL_OPS_TOOL],
        }
    }

    /// Tools the chatbot binds to reach this subgraph.
    pub fn router_tools(self) -> &'static [&'static str] {
        match self {
            Subgraph::CreateProject => &[names::CREATE_PROJECT_SUBGRAPH_INTERFACE_TOOL],
            Subgraph::FloodingRainfall => &[names::FLOODING_RAINFALL_SUBGRAPH_INTERFACE_TOOL],
            other => other.tools(),
        }
    }

    /// The subgraph a chatbot tool call routes to.
    pub fn for_router_tool(tool: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|sg| sg.router_tools().contains(&tool))
    }
}

/// Every tool the chatbot can bind, in binding order.
pub fn router_tool_names() -> impl Iterator<Item = &'static str> {
    Subgraph::ALL.into_iter().flat_map(|sg| sg.router_tools().iter().copied())
}

/// Definition of a pipeline interface tool. These open a pipeline and have
/// no action of their own, so they are not in the tool registry.
pub fn interface_definition(tool: &str) -> Option<ToolDefinition> {
    let description = match tool {
        names::CREATE_PROJECT_SUBGRAPH_INTERFACE_TOOL => {
            "Creates a new SaferPlaces project. The pipeline selects, in order: the Digital \
             Terrain Model (area of interest or DTM file), the buildings, the infiltration rate, \
             the lithology and any other layers. Invoke it whatever the level of detail of the \
             user's request: the pipeline asks for missing parameters itself and returns the \
             result of the project creation."
        }
        names::FLOODING_RAINFALL_SUBGRAPH_INTERFACE_TOOL => {
            "Prepares a flooding simulation driven by rainfall. The pipeline defines the rain \
             event (type, amount, duration) and then the flood model (saferplaces or untrim and \
             its parameters). Invoke it whatever the level of detail of the user's request: the \
             pipeline asks for missing parameters itself."
        }
        _ => return None,
    };
    Some(ToolDefinition {
        name: tool.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "user_request": {
                    "type": "string",
                    "description": "The user message that asked for this pipeline."
                }
            },
            "required": ["user_request"]
        }),
    })
}
