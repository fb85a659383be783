//! The chatbot: one model call per visit, routing any tool call to the
//! subgraph that owns it.

use saferplaces_core::error::GraphError;
use saferplaces_core::message::Message;
use saferplaces_core::names;
use saferplaces_core::provider::{ProviderRequest, ToolChoice, ToolDefinition};
use saferplaces_core::state::{ConversationState, StateUpdate};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::graph::{Command, Graph, NodeId, NodeOutcome};
use crate::subgraph::{Subgraph, interface_definition, router_tool_names};

/// Definitions bound for this visit: `Some([])` binds every router tool,
/// `None` binds none, a list binds the router tools it names.
pub fn bound_tools(graph: &Graph, available: Option<&[String]>) -> Vec<ToolDefinition> {
    let Some(available) = available else {
        return Vec::new();
    };
    router_tool_names()
        .filter(|name| available.is_empty() || available.iter().any(|a| a == name))
        .filter_map(|name| {
            interface_definition(name)
                .or_else(|| graph.tools.get(name).map(|tool| tool.to_definition()))
        })
        .collect()
}

pub async fn chatbot(graph: &Graph, state: &ConversationState) -> Result<NodeOutcome, GraphError> {
    if state.params(names::CHATBOT_UPDATE_MESSAGES).is_some() {
        return Ok(NodeOutcome::Command(Command::goto(
            NodeId::ChatbotUpdateMessages,
            StateUpdate::new(),
        )));
    }
    if state.messages.is_empty() {
        return Ok(NodeOutcome::Command(Command::end(StateUpdate::new())));
    }

    let tools = bound_tools(graph, state.available_tools.as_deref());
    let tool_choice = match state.param(names::CHATBOT, "tool_choice") {
        Some(choice) if !tools.is_empty() => serde_json::from_value::<ToolChoice>(choice.clone())
            .map(Some)
            .map_err(|e| GraphError::InvalidParams(format!("tool_choice: {e}")))?,
        _ => None,
    };

    let mut request = ProviderRequest::new(&graph.model, state.messages.clone());
    request.temperature = graph.temperature;
    request.max_tokens = graph.max_tokens;
    request.tools = tools;
    request.tool_choice = tool_choice;

    let response = graph.provider.complete(request).await?;
    let mut message = response.message;
    if message.tool_calls.len() > 1 {
        debug!(dropped = message.tool_calls.len() - 1, "keeping only the first tool call");
        message.tool_calls.truncate(1);
    }

    let Some(call) = message.first_tool_call() else {
        return Ok(NodeOutcome::Command(Command::end(
            StateUpdate::new().message(message).clear_params(),
        )));
    };

    let subgraph = Subgraph::for_router_tool(&call.name).ok_or_else(|| GraphError::UnknownTool {
        node: names::CHATBOT.to_string(),
        tool: call.name.clone(),
    })?;
    info!(tool = %call.name, subgraph = subgraph.name(), "routing tool call");

    let mut update = StateUpdate::new()
        .history(subgraph.name())
        .params(names::CHATBOT, json!({ "tool_choice": Value::Null }));
    if subgraph.forwards_message() {
        update = update.message(message);
    }
    Ok(NodeOutcome::Command(Command::goto(subgraph.entry(), update)))
}

/// Append the messages queued under `node_params[chatbot_update_messages]`
/// and hand control back to the chatbot.
pub fn update_messages(state: &ConversationState) -> Result<NodeOutcome, GraphError> {
    let messages = match state.param(names::CHATBOT_UPDATE_MESSAGES, "update_messages") {
        Some(value) => serde_json::from_value::<Vec<Message>>(value.clone())
            .map_err(|e| GraphError::InvalidParams(format!("update_messages: {e}")))?,
        None => Vec::new(),
    };
    Ok(NodeOutcome::Command(Command::goto(
        NodeId::Chatbot,
        StateUpdate::new().messages(messages).clear_params(),
    )))
}
