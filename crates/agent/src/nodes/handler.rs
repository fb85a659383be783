//! The tool handler: runs the tool call in the last message and turns a
//! suspension into a hand-off to the paired interrupt node.

use saferplaces_core::error::GraphError;
use saferplaces_core::message::{Message, MessageToolCall};
use saferplaces_core::rules::ToolArgs;
use saferplaces_core::state::{ConversationState, StateUpdate};
use saferplaces_core::tool::{
    AgentTool, GateOverride, Interrupt, Invocation, ToolContext, ToolGate, ToolOutcome, ToolOutput,
    invoke,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::graph::{Command, Graph, NodeId, NodeOutcome};
use crate::subgraph::Subgraph;

/// Stored under `node_params[<interrupt node>]` while a call is suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptPackage {
    /// The assistant message whose tool call is suspended.
    pub tool_message: Message,
    pub tool_interrupt: Interrupt,
    /// Handler to go back to once the user answered.
    pub tool_handler_node: String,
}

/// Stored under `node_params[<handler>].resume` by the interrupt node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeDirective {
    pub tool_call_id: String,
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateOverride>,
}

/// Stored under `node_params[<handler>].on_end` by a pipeline runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnEnd {
    pub main: String,
    pub tool: String,
    pub next: String,
}

fn params_of<T: serde::de::DeserializeOwned>(
    state: &ConversationState,
    node: NodeId,
    key: &str,
) -> Result<Option<T>, GraphError> {
    state
        .param(node.as_str(), key)
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| GraphError::InvalidParams(format!("{node}.{key}: {e}")))
}

pub async fn tool_handler(
    graph: &Graph,
    subgraph: Subgraph,
    state: &ConversationState,
    project_bucket: &str,
) -> Result<NodeOutcome, GraphError> {
    let node = subgraph.handler();
    let message = state
        .last_message()
        .filter(|m| !m.tool_calls.is_empty())
        .ok_or_else(|| GraphError::MissingToolCall {
            node: node.to_string(),
        })?;
    let Some(call) = message.first_tool_call() else {
        return Err(GraphError::MissingToolCall {
            node: node.to_string(),
        });
    };

    let tool = subgraph
        .tools()
        .contains(&call.name.as_str())
        .then(|| graph.tools.get(&call.name))
        .flatten()
        .ok_or_else(|| GraphError::UnknownTool {
            node: node.to_string(),
            tool: call.name.clone(),
        })?;

    let resume = params_of::<ResumeDirective>(state, node, "resume")?.filter(|r| r.tool_call_id == call.id);
    let ctx = ToolContext::new(state, project_bucket);
    let invocation = run_call(tool.as_ref(), call, resume, &ctx).await;

    match invocation {
        Invocation::Suspended(mut interrupt) => {
            info!(tool = %call.name, kind = interrupt.interrupt_type.as_str(), "tool call suspended");
            interrupt.namespace = vec![subgraph.name().to_string(), node.to_string()];
            let package = InterruptPackage {
                tool_message: message.clone(),
                tool_interrupt: interrupt,
                tool_handler_node: node.to_string(),
            };
            let package = serde_json::to_value(package)
                .map_err(|e| GraphError::InvalidParams(format!("interrupt package: {e}")))?;
            let update = StateUpdate::new()
                .params(node.as_str(), json!({ "resume": Value::Null }))
                .clear_params_for(subgraph.interrupt().as_str())
                .params(subgraph.interrupt().as_str(), package);
            Ok(NodeOutcome::Command(Command::goto(subgraph.interrupt(), update)))
        }
        Invocation::Completed(ToolOutcome { output, .. }) => {
            info!(tool = %call.name, error = output.is_error(), "tool call completed");
            let mut update = StateUpdate::new()
                .message(Message::tool_result(&call.id, &call.name, output.render()))
                .messages(output.updates.messages.iter().cloned())
                .layers(output.updates.layer_registry.iter().cloned())
                .clear_params_for(node.as_str())
                .clear_params_for(subgraph.interrupt().as_str());

            match params_of::<OnEnd>(state, node, "on_end")? {
                Some(on_end) => {
                    let next = NodeId::parse(&on_end.next)?;
                    let mut outputs = Map::new();
                    outputs.insert(on_end.tool, output.content);
                    update = update.params(on_end.main, json!({ "tool_outputs": outputs }));
                    Ok(NodeOutcome::Command(Command::goto(next, update)))
                }
                None => Ok(NodeOutcome::Command(Command::end(update))),
            }
        }
    }
}

async fn run_call(
    tool: &dyn AgentTool,
    call: &MessageToolCall,
    resume: Option<ResumeDirective>,
    ctx: &ToolContext<'_>,
) -> Invocation {
    let (args, mut gate) = match resume {
        Some(resume) => {
            let gate = match &resume.gate {
                Some(over) => ToolGate::with_override(tool.gate_defaults(), over),
                None => ToolGate::new(tool.gate_defaults()),
            };
            (ToolArgs::from(resume.args), gate)
        }
        None => match call.parse_arguments() {
            Ok(args) => (ToolArgs::from(args), ToolGate::new(tool.gate_defaults())),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "malformed tool arguments");
                return Invocation::Completed(ToolOutcome {
                    args: ToolArgs::new(),
                    output: ToolOutput::error(format!("Malformed arguments for {}: {e}", call.name)),
                });
            }
        },
    };
    invoke(tool, args, &mut gate, ctx).await
}
