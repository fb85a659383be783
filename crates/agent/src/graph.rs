//! The dispatch graph.
//!
//! Nodes are a closed set ([`NodeId`]). Running a node never mutates the
//! state: it returns a [`Command`] naming the next node plus a
//! [`StateUpdate`], or suspends with an [`Interrupt`]. The turn driver in
//! [`crate::turn`] folds each update into the state before the next step.
//!
//! ```text
//! chatbot ──tool call──▶ subgraph entry ──▶ … ──Goto::End──▶ chatbot ──Goto::End──▶ end of turn
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use saferplaces_core::error::GraphError;
use saferplaces_core::message::{Message, Role};
use saferplaces_core::names;
use saferplaces_core::provider::Provider;
use saferplaces_core::state::{ConversationState, StateUpdate};
use saferplaces_core::tool::{Interrupt, InterruptType};
use saferplaces_tools::{Assistant, ToolRegistry};
use serde_json::json;

use crate::interrupt::{ConfirmationHandler, InterruptHandler};
use crate::nodes;
use crate::subgraph::{CREATE_PROJECT, FLOODING_RAINFALL, Pipeline, Subgraph};

pub const DEFAULT_MAX_STEPS: usize = 64;

/// Every node of the graph. The string names are part of the persisted
/// state: they key `node_params` and `node_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Chatbot,
    ChatbotUpdateMessages,

    DemoToolHandler,
    DemoToolInterrupt,

    CreateProjectMain,
    CreateProjectToolHandler,
    CreateProjectToolInterrupt,
    SelectDtmRunner,
    SelectBuildingsRunner,
    SelectInfiltrationRunner,
    SelectLithologyRunner,
    SelectOtherLayersRunner,

    FloodingRainfallMain,
    FloodingRainfallToolHandler,
    FloodingRainfallToolInterrupt,
    DefineRainRunner,
    DefineModelRunner,

    SaferplacesApiToolHandler,
    SaferplacesApiToolInterrupt,

    SafercastApiToolHandler,
    SafercastApiToolInterrupt,

    GeospatialOpsToolHandler,
    GeospatialOpsToolInterrupt,
}

/// What a node does, with the data it is wired to.
#[derive(Debug, Clone, Copy)]
pub enum NodeRole {
    Chatbot,
    UpdateMessages,
    Main(&'static Pipeline),
    Runner(&'static Pipeline),
    Handler(Subgraph),
    Interrupt(Subgraph),
}

impl NodeId {
    pub const ALL: [NodeId; 23] = [
        NodeId::Chatbot,
        NodeId::ChatbotUpdateMessages,
        NodeId::DemoToolHandler,
        NodeId::DemoToolInterrupt,
        NodeId::CreateProjectMain,
        NodeId::CreateProjectToolHandler,
        NodeId::CreateProjectToolInterrupt,
        NodeId::SelectDtmRunner,
        NodeId::SelectBuildingsRunner,
        NodeId::SelectInfiltrationRunner,
        NodeId::SelectLithologyRunner,
        NodeId::SelectOtherLayersRunner,
        NodeId::FloodingRainfallMain,
        NodeId::FloodingRainfallToolHandler,
        NodeId::FloodingRainfallToolInterrupt,
        NodeId::DefineRainRunner,
        NodeId::DefineModelRunner,
        NodeId::SaferplacesApiToolHandler,
        NodeId::SaferplacesApiToolInterrupt,
        NodeId::SafercastApiToolHandler,
        NodeId::SafercastApiToolInterrupt,
        NodeId::GeospatialOpsToolHandler,
        NodeId::GeospatialOpsToolInterrupt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::Chatbot => names::CHATBOT,
            NodeId::ChatbotUpdateMessages => names::CHATBOT_UPDATE_MESSAGES,
            NodeId::DemoToolHandler => names::DEMO_TOOL_HANDLER,
            NodeId::DemoToolInterrupt => names::DEMO_TOOL_INTERRUPT,
            NodeId::CreateProjectMain => names::CREATE_PROJECT_MAIN,
            NodeId::CreateProjectToolHandler => names::CREATE_PROJECT_TOOL_HANDLER,
            NodeId::CreateProjectToolInterrupt => names::CREATE_PROJECT_TOOL_INTERRUPT,
            NodeId::SelectDtmRunner => names::CREATE_PROJECT_SELECT_DTM_TOOL_RUNNER,
            NodeId::SelectBuildingsRunner => names::CREATE_PROJECT_SELECT_BUILDINGS_TOOL_RUNNER,
            NodeId::SelectInfiltrationRunner => names::CREATE_PROJECT_SELECT_INFILTRATION_TOOL_RUNNER,
            NodeId::SelectLithologyRunner => names::CREATE_PROJECT_SELECT_LITHOLOGY_TOOL_RUNNER,
            NodeId::SelectOtherLayersRunner => names::CREATE_PROJECT_SELECT_OTHER_LAYERS_TOOL_RUNNER,
            NodeId::FloodingRainfallMain => names::FLOODING_RAINFALL_MAIN,
            NodeId::FloodingRainfallToolHandler => names::FLOODING_RAINFALL_TOOL_HANDLER,
            NodeId::FloodingRainfallToolInterrupt => names::FLOODING_RAINFALL_TOOL_INTERRUPT,
            NodeId::DefineRainRunner => names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL_RUNNER,
            NodeId::DefineModelRunner => names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL_RUNNER,
            NodeId::SaferplacesApiToolHandler => names::SAFERPLACES_API_TOOL_HANDLER,
            NodeId::SaferplacesApiToolInterrupt => names::SAFERPLACES_API_TOOL_INTERRUPT,
            NodeId::SafercastApiToolHandler => names::SAFERCAST_API_TOOL_HANDLER,
            NodeId::SafercastApiToolInterrupt => names::SAFERCAST_API_TOOL_INTERRUPT,
            NodeId::GeospatialOpsToolHandler => names::GEOSPATIAL_OPS_TOOL_HANDLER,
            NodeId::GeospatialOpsToolInterrupt => names::GEOSPATIAL_OPS_TOOL_INTERRUPT,
        }
    }

    pub fn parse(name: &str) -> Result<Self, GraphError> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    pub fn role(self) -> NodeRole {
        match self {
            NodeId::Chatbot => NodeRole::Chatbot,
            NodeId::ChatbotUpdateMessages => NodeRole::UpdateMessages,
            NodeId::CreateProjectMain => NodeRole::Main(&CREATE_PROJECT),
            NodeId::FloodingRainfallMain => NodeRole::Main(&FLOODING_RAINFALL),
            NodeId::SelectDtmRunner
            | NodeId::SelectBuildingsRunner
            | NodeId::SelectInfiltrationRunner
            | NodeId::SelectLithologyRunner
            | NodeId::SelectOtherLayersRunner => NodeRole::Runner(&CREATE_PROJECT),
            NodeId::DefineRainRunner | NodeId::DefineModelRunner => NodeRole::Runner(&FLOODING_RAINFALL),
            NodeId::DemoToolHandler => NodeRole::Handler(Subgraph::Demo),
            NodeId::CreateProjectToolHandler => NodeRole::Handler(Subgraph::CreateProject),
            NodeId::FloodingRainfallToolHandler => NodeRole::Handler(Subgraph::FloodingRainfall),
            NodeId::SaferplacesApiToolHandler => NodeRole::Handler(Subgraph::SaferplacesApi),
            NodeId::SafercastApiToolHandler => NodeRole::Handler(Subgraph::SafercastApi),
            NodeId::GeospatialOpsToolHandler => NodeRole::Handler(Subgraph::GeospatialOps),
            NodeId::DemoToolInterrupt => NodeRole::Interrupt(Subgraph::Demo),
            NodeId::CreateProjectToolInterrupt => NodeRole::Interrupt(Subgraph::CreateProject),
            NodeId::FloodingRainfallToolInterrupt => NodeRole::Interrupt(Subgraph::FloodingRainfall),
            NodeId::SaferplacesApiToolInterrupt => NodeRole::Interrupt(Subgraph::SaferplacesApi),
            NodeId::SafercastApiToolInterrupt => NodeRole::Interrupt(Subgraph::SafercastApi),
            NodeId::GeospatialOpsToolInterrupt => NodeRole::Interrupt(Subgraph::GeospatialOps),
        }
    }

    /// The subgraph this node belongs to; `None` for the top level.
    pub fn subgraph(self) -> Option<Subgraph> {
        match self.role() {
            NodeRole::Chatbot | NodeRole::UpdateMessages => None,
            NodeRole::Handler(sg) | NodeRole::Interrupt(sg) => Some(sg),
            NodeRole::Main(p) | NodeRole::Runner(p) => Subgraph::for_router_tool(p.interface_tool),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where control goes after a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goto {
    Node(NodeId),
    /// Leave the current subgraph, or end the turn at the top level.
    End,
}

/// A node's routing decision and its state contribution.
#[derive(Debug, Clone)]
pub struct Command {
    pub goto: Goto,
    pub update: StateUpdate,
}

impl Command {
    pub fn goto(node: NodeId, update: StateUpdate) -> Self {
        Self {
            goto: Goto::Node(node),
            update,
        }
    }

    pub fn end(update: StateUpdate) -> Self {
        Self {
            goto: Goto::End,
            update,
        }
    }
}

/// Result of running one node.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Command(Command),
    /// The turn stops here until the user answers.
    Suspend(Interrupt),
}

/// Node implementations and the collaborators they share. One graph
/// serves every session.
pub struct Graph {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) assistant: Assistant,
    pub(crate) tools: ToolRegistry,
    pub(crate) model: String,
    pub(crate) temperature: f32,
    pub(crate) max_tokens: Option<u32>,
    max_steps: usize,
    interrupt_handlers: HashMap<InterruptType, Arc<dyn InterruptHandler>>,
    default_handler: Arc<dyn InterruptHandler>,
}

impl Graph {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: ToolRegistry,
        assistant: Assistant,
    ) -> Self {
        Self {
            provider,
            default_handler: Arc::new(ConfirmationHandler::new(assistant.clone())),
            assistant,
            tools,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            max_steps: DEFAULT_MAX_STEPS,
            interrupt_handlers: HashMap::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Resolve interrupts of `interrupt_type` with `handler` instead of the
    /// default confirmation handler.
    pub fn with_interrupt_handler(
        mut self,
        interrupt_type: InterruptType,
        handler: Arc<dyn InterruptHandler>,
    ) -> Self {
        self.interrupt_handlers.insert(interrupt_type, handler);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub(crate) fn interrupt_handler(&self, interrupt_type: &InterruptType) -> &dyn InterruptHandler {
        self.interrupt_handlers
            .get(interrupt_type)
            .unwrap_or(&self.default_handler)
            .as_ref()
    }

    /// Run one node against the current state.
    ///
    /// `resume` carries the user's reply when the turn restarts at the
    /// interrupt node that suspended it.
    pub async fn run_node(
        &self,
        node: NodeId,
        state: &ConversationState,
        resume: Option<&str>,
        project_bucket: &str,
    ) -> Result<NodeOutcome, GraphError> {
        match node.role() {
            NodeRole::Chatbot => nodes::chatbot::chatbot(self, state).await,
            NodeRole::UpdateMessages => nodes::chatbot::update_messages(state),
            NodeRole::Main(pipeline) => nodes::pipeline::main(self, pipeline, state).await,
            NodeRole::Runner(pipeline) => nodes::pipeline::runner(pipeline, node, state),
            NodeRole::Handler(sg) => nodes::handler::tool_handler(self, sg, state, project_bucket).await,
            NodeRole::Interrupt(sg) => nodes::interrupt::tool_interrupt(self, sg, state, resume).await,
        }
    }
}

/// State changes that close a turn after a routing error: error results
/// for tool calls left unanswered, a diagnostic reply, and no leftover
/// node parameters.
pub fn recovery_update(state: &ConversationState, error: &GraphError) -> StateUpdate {
    let mut update = StateUpdate::new();
    if let Some(last) = state.last_message().filter(|m| m.role == Role::Assistant) {
        for call in &last.tool_calls {
            let content = json!({ "error": format!("Tool call aborted: {error}") });
            update = update.message(Message::tool_result(&call.id, &call.name, content.to_string()));
        }
    }
    update
        .message(Message::assistant(format!(
            "Sorry, I could not complete your request ({error}). Please try again."
        )))
        .clear_params()
}

/// Error results for tool calls anywhere in the history that never got
/// one, as left behind by a turn dropped between nodes. `None` when every
/// call is answered.
pub fn unanswered_calls_update(state: &ConversationState) -> Option<StateUpdate> {
    let answered: HashSet<&str> = state
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    let calls: Vec<_> = state
        .messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| &m.tool_calls)
        .filter(|call| !answered.contains(call.id.as_str()))
        .collect();
    if calls.is_empty() {
        return None;
    }

    let mut update = StateUpdate::new();
    for call in calls {
        let content = json!({ "error": "Tool call aborted: the turn ended before the tool ran." });
        update = update.message(Message::tool_result(&call.id, &call.name, content.to_string()));
    }
    Some(update.clear_params())
}
