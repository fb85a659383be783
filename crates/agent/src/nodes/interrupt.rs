//! The tool interrupt node.
//!
//! Entered twice per suspension: first from the handler, when it surfaces
//! the interrupt and the turn stops; then at the start of the next turn
//! with the user's reply, which it resolves and routes back to the handler.

use saferplaces_core::error::GraphError;
use saferplaces_core::message::Message;
use saferplaces_core::names;
use saferplaces_core::state::{ConversationState, StateUpdate};
use saferplaces_core::tool::{GateOverride, InterruptType};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::graph::{Command, Graph, NodeId, NodeOutcome};
use crate::interrupt::Resolution;
use crate::nodes::handler::{InterruptPackage, ResumeDirective};
use crate::subgraph::Subgraph;

fn missing(node: NodeId, reason: impl Into<String>) -> GraphError {
    GraphError::MissingInterruptPackage {
        node: node.to_string(),
        reason: reason.into(),
    }
}

fn load_package(state: &ConversationState, node: NodeId) -> Result<InterruptPackage, GraphError> {
    let params = state
        .params(node.as_str())
        .ok_or_else(|| missing(node, "nothing stored"))?;
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| missing(node, e.to_string()))
}

pub async fn tool_interrupt(
    graph: &Graph,
    subgraph: Subgraph,
    state: &ConversationState,
    resume: Option<&str>,
) -> Result<NodeOutcome, GraphError> {
    let node = subgraph.interrupt();
    let package = load_package(state, node)?;
    let interrupt = package.tool_interrupt;

    let Some(reply) = resume else {
        info!(tool = %interrupt.tool_name, kind = interrupt.interrupt_type.as_str(), "waiting for user");
        return Ok(NodeOutcome::Suspend(interrupt));
    };

    let handler = NodeId::parse(&package.tool_handler_node).map_err(|e| missing(node, e.to_string()))?;
    let call = package
        .tool_message
        .first_tool_call()
        .ok_or_else(|| missing(node, "stored message has no tool call"))?;

    let resolution = graph
        .interrupt_handler(&interrupt.interrupt_type)
        .resolve(&interrupt, reply)
        .await?;
    info!(tool = %interrupt.tool_name, ?resolution, "interrupt resolved");

    match resolution {
        Resolution::Approve => {
            let gate = match interrupt.interrupt_type {
                InterruptType::OutputConfirmation => GateOverride {
                    execution_confirmed: Some(true),
                    output_confirmed: Some(true),
                    confirmed_output: interrupt.pending_output.clone(),
                },
                _ => GateOverride {
                    execution_confirmed: Some(true),
                    ..Default::default()
                },
            };
            let args = interrupt.args.as_map().clone();
            back_to_handler(node, handler, &call.id, args, Some(gate))
        }
        Resolution::Modify(changes) => {
            let mut args = interrupt.args.clone();
            args.merge(&changes);
            back_to_handler(node, handler, &call.id, args.into_map(), None)
        }
        Resolution::Deny => {
            let result = json!({
                "status": "cancelled",
                "message": format!("The user declined to run {}.", call.name),
            });
            let note = Message::system(format!(
                "The user cancelled the {} tool call. Acknowledge it and ask what they want to do next.",
                call.name
            ));
            let update = StateUpdate::new()
                .message(Message::tool_result(&call.id, &call.name, result.to_string()))
                .clear_params()
                .params(names::CHATBOT_UPDATE_MESSAGES, json!({ "update_messages": [note] }));
            Ok(NodeOutcome::Command(Command::end(update)))
        }
        Resolution::Unclear => {
            let mut again = interrupt;
            again.content = format!("Sorry, I did not understand your answer.\n\n{}", again.content);
            Ok(NodeOutcome::Suspend(again))
        }
    }
}

fn back_to_handler(
    node: NodeId,
    handler: NodeId,
    tool_call_id: &str,
    args: Map<String, Value>,
    gate: Option<GateOverride>,
) -> Result<NodeOutcome, GraphError> {
    let directive = ResumeDirective {
        tool_call_id: tool_call_id.to_string(),
        args,
        gate,
    };
    let directive = serde_json::to_value(directive)
        .map_err(|e| GraphError::InvalidParams(format!("resume directive: {e}")))?;
    let update = StateUpdate::new()
        .clear_params_for(node.as_str())
        .params(handler.as_str(), json!({ "resume": directive }));
    Ok(NodeOutcome::Command(Command::goto(handler, update)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Goto;
    use crate::test_helpers::{EchoTool, ScriptedProvider, graph_with, text};
    use saferplaces_core::message::MessageToolCall;
    use saferplaces_core::rules::ToolArgs;
    use saferplaces_core::tool::{GateDefaults, Interrupt, ToolOutput};
    use std::sync::Arc;

    fn graph(responses: Vec<saferplaces_core::provider::ProviderResponse>) -> Graph {
        let provider = Arc::new(ScriptedProvider::new(responses));
        graph_with(provider, vec![Arc::new(EchoTool::new(names::GEOSPATIAL_OPS_TOOL, GateDefaults::NONE))])
    }

    fn suspended(interrupt_type: InterruptType) -> ConversationState {
        let args = json!({"place": "Rome"}).as_object().cloned().unwrap();
        let call = MessageToolCall::new("call_9", names::GEOSPATIAL_OPS_TOOL, &args);
        let package = InterruptPackage {
            tool_message: Message::tool_call(call),
            tool_interrupt: Interrupt {
                content: "Keep it?".into(),
                interrupt_type,
                tool_name: names::GEOSPATIAL_OPS_TOOL.into(),
                args: ToolArgs::from(args),
                pending_output: Some(ToolOutput::new(json!({"generated_code": "print(1)"}))),
                resumable: true,
                namespace: vec![],
            },
            tool_handler_node: names::GEOSPATIAL_OPS_TOOL_HANDLER.into(),
        };
        let mut state = ConversationState::default();
        state.apply(StateUpdate::new().params(
            names::GEOSPATIAL_OPS_TOOL_INTERRUPT,
            serde_json::to_value(package).unwrap(),
        ));
        state
    }

    async fn run(graph: &Graph, state: &ConversationState, reply: Option<&str>) -> NodeOutcome {
        tool_interrupt(graph, Subgraph::GeospatialOps, state, reply).await.unwrap()
    }

    fn resume_of(state: &ConversationState) -> ResumeDirective {
        let value = state.param(names::GEOSPATIAL_OPS_TOOL_HANDLER, "resume").cloned().unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn without_reply_it_surfaces_the_interrupt() {
        let graph = graph(vec![]);
        let state = suspended(InterruptType::ExecutionConfirmation);
        match run(&graph, &state, None).await {
            NodeOutcome::Suspend(i) => assert_eq!(i.content, "Keep it?"),
            NodeOutcome::Command(_) => panic!("expected suspension"),
        }
    }

    #[tokio::test]
    async fn approving_output_replays_pending_result() {
        let graph = graph(vec![]);
        let mut state = suspended(InterruptType::OutputConfirmation);
        let NodeOutcome::Command(cmd) = run(&graph, &state, Some("yes")).await else {
            panic!("expected routing");
        };
        assert_eq!(cmd.goto, Goto::Node(NodeId::GeospatialOpsToolHandler));
        state.apply(cmd.update);

        let resume = resume_of(&state);
        assert_eq!(resume.tool_call_id, "call_9");
        let gate = resume.gate.unwrap();
        assert_eq!(gate.output_confirmed, Some(true));
        assert_eq!(gate.confirmed_output.unwrap().content["generated_code"], "print(1)");
        assert!(state.params(names::GEOSPATIAL_OPS_TOOL_INTERRUPT).is_none());
    }

    #[tokio::test]
    async fn modification_merges_args_without_confirming() {
        let graph = graph(vec![text(r#"{"decision": "modify", "args": {"place": "Milan"}}"#)]);
        let mut state = suspended(InterruptType::ExecutionConfirmation);
        let NodeOutcome::Command(cmd) = run(&graph, &state, Some("do Milan instead")).await else {
            panic!("expected routing");
        };
        state.apply(cmd.update);
        let resume = resume_of(&state);
        assert_eq!(resume.args["place"], "Milan");
        assert!(resume.gate.is_none());
    }

    #[tokio::test]
    async fn denial_cancels_and_leaves_the_subgraph() {
        let graph = graph(vec![]);
        let mut state = suspended(InterruptType::ExecutionConfirmation);
        let NodeOutcome::Command(cmd) = run(&graph, &state, Some("no")).await else {
            panic!("expected routing");
        };
        assert_eq!(cmd.goto, Goto::End);
        assert_eq!(cmd.update.messages[0].tool_call_id.as_deref(), Some("call_9"));
        assert!(cmd.update.messages[0].content.contains("cancelled"));
        state.apply(cmd.update);
        assert!(state.params(names::GEOSPATIAL_OPS_TOOL_INTERRUPT).is_none());
        assert!(state.params(names::CHATBOT_UPDATE_MESSAGES).is_some());
    }

    #[tokio::test]
    async fn unclear_reply_asks_again() {
        let graph = graph(vec![text("I am not sure")]);
        let state = suspended(InterruptType::ExecutionConfirmation);
        match run(&graph, &state, Some("hmm, what?")).await {
            NodeOutcome::Suspend(i) => assert!(i.content.starts_with("Sorry")),
            NodeOutcome::Command(_) => panic!("expected another question"),
        }
    }

    #[tokio::test]
    async fn missing_package_is_fatal() {
        let graph = graph(vec![]);
        let err = tool_interrupt(&graph, Subgraph::GeospatialOps, &ConversationState::default(), Some("yes"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingInterruptPackage { .. }));
    }

    #[tokio::test]
    async fn custom_handler_takes_precedence() {
        struct AlwaysDeny;
        #[async_trait::async_trait]
        impl crate::interrupt::InterruptHandler for AlwaysDeny {
            async fn resolve(&self, _: &Interrupt, _: &str) -> Result<Resolution, GraphError> {
                Ok(Resolution::Deny)
            }
        }

        let graph = graph(vec![]).with_interrupt_handler(InterruptType::ExecutionConfirmation, Arc::new(AlwaysDeny));
        let state = suspended(InterruptType::ExecutionConfirmation);
        let NodeOutcome::Command(cmd) = run(&graph, &state, Some("yes")).await else {
            panic!("expected routing");
        };
        assert_eq!(cmd.goto, Goto::End);
    }
}
