//! Pipeline MAIN and runner nodes.
//!
//! MAIN runs twice. On entry it asks the auxiliary model which sub-tool
//! arguments the user already gave and stores them under each sub-tool's
//! name, then hands over to the first runner. Each runner turns those
//! parameters into a tool call for the shared handler and leaves an
//! `on_end` note telling the handler where the output goes and which
//! runner comes next. Once every sub-tool output is present MAIN reports
//! them back to the chatbot as the result of the interface tool.

use chrono::{SecondsFormat, Utc};
use saferplaces_core::error::GraphError;
use saferplaces_core::message::{Message, MessageToolCall, Role};
use saferplaces_core::state::{ConversationState, StateUpdate};
use saferplaces_tools::AskRole;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::graph::{Command, Graph, NodeId, NodeOutcome};
use crate::nodes::handler::OnEnd;
use crate::subgraph::Pipeline;

/// `call_` plus a digest of the tool name, its arguments and the time.
pub fn call_id(tool: &str, args: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(Value::Object(args.clone()).to_string().as_bytes());
    hasher.update(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("call_{hex}")
}

fn describe_steps(graph: &Graph, pipeline: &Pipeline) -> String {
    pipeline
        .steps
        .iter()
        .enumerate()
        .filter_map(|(i, step)| graph.tools.get(step.tool).map(|tool| (i, tool)))
        .map(|(i, tool)| {
            let schema = tool.parameters_schema();
            let args = schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, p)| {
                            let description = p.get("description").and_then(Value::as_str).unwrap_or("");
                            format!("  - {name}: {description}")
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "  No arguments required.".into());
            format!(
                "{}. Tool: {}\n  Description: {}\n  Arguments:\n{args}",
                i + 1,
                tool.name(),
                tool.description()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Sub-tool arguments the user already supplied, keyed by sub-tool name.
async fn prefill(graph: &Graph, pipeline: &Pipeline, request: &str) -> Map<String, Value> {
    let prompt = format!(
        "The user asked to {}. This is done by a sequence of steps; in each step the user is \
         asked for some parameters.\n\nThe steps are:\n{}\n\nThe user request is: {request}\n\n\
         If the user already provided valid arguments, reply with a JSON object whose keys are \
         tool names and whose values are objects with the arguments for that tool. Use null for \
         arguments that were not provided. The user may provide only some of the arguments.\n\
         Reply with the JSON object only.",
        pipeline.summary,
        describe_steps(graph, pipeline),
    );
    match graph.assistant.ask_json(AskRole::System, &prompt).await {
        Ok(Value::Object(provided)) => provided
            .into_iter()
            .filter(|(tool, args)| pipeline.has_tool(tool) && args.is_object())
            .collect(),
        Ok(_) => Map::new(),
        Err(e) => {
            warn!(error = %e, main = %pipeline.main, "argument prefill failed");
            Map::new()
        }
    }
}

pub async fn main(
    graph: &Graph,
    pipeline: &'static Pipeline,
    state: &ConversationState,
) -> Result<NodeOutcome, GraphError> {
    let outputs = state
        .params(pipeline.main.as_str())
        .and_then(|p| p.get("tool_outputs"))
        .and_then(Value::as_object);

    let Some(outputs) = outputs else {
        let request = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let provided = prefill(graph, pipeline, request).await;
        debug!(main = %pipeline.main, tools = ?provided.keys().collect::<Vec<_>>(), "pipeline prefilled");

        let mut update = StateUpdate::new();
        for (tool, args) in provided {
            update = update.clear_params_for(tool.as_str()).params(tool, args);
        }
        let first = pipeline.steps.first().map(|s| s.runner).unwrap_or(pipeline.main);
        return Ok(NodeOutcome::Command(Command::goto(first, update)));
    };

    // Key presence, not value: a sub-tool may legitimately return null.
    if let Some(step) = pipeline.steps.iter().find(|s| !outputs.contains_key(s.tool)) {
        return Ok(NodeOutcome::Command(Command::goto(step.runner, StateUpdate::new())));
    }

    info!(main = %pipeline.main, "pipeline complete");
    let mut args = Map::new();
    args.insert("user_request".into(), json!(pipeline.summary));
    let call = MessageToolCall::new(call_id(pipeline.interface_tool, &args), pipeline.interface_tool, &args);
    let result = Message::tool_result(&call.id, pipeline.interface_tool, Value::Object(outputs.clone()).to_string());
    let update = StateUpdate::new()
        .message(Message::tool_call(call))
        .message(result)
        .clear_params();
    Ok(NodeOutcome::Command(Command::end(update)))
}

pub fn runner(
    pipeline: &'static Pipeline,
    node: NodeId,
    state: &ConversationState,
) -> Result<NodeOutcome, GraphError> {
    let step = pipeline
        .step_for_runner(node)
        .ok_or_else(|| GraphError::UnknownNode(node.to_string()))?;
    let args = state.params(step.tool).cloned().unwrap_or_default();
    let call = MessageToolCall::new(call_id(step.tool, &args), step.tool, &args);

    let on_end = OnEnd {
        main: pipeline.main.to_string(),
        tool: step.tool.to_string(),
        next: pipeline.next_after(step.tool).to_string(),
    };
    let on_end = serde_json::to_value(on_end).map_err(|e| GraphError::InvalidParams(e.to_string()))?;
    let update = StateUpdate::new()
        .message(Message::tool_call(call))
        .params(pipeline.handler.as_str(), json!({ "on_end": on_end }));
    Ok(NodeOutcome::Command(Command::goto(pipeline.handler, update)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Goto;
    use crate::subgraph::{CREATE_PROJECT, FLOODING_RAINFALL};
    use crate::test_helpers::{ScriptedProvider, graph_with, text};
    use saferplaces_core::names;
    use saferplaces_tools::flooding_rainfall::{DefineModelTool, DefineRainTool};
    use std::sync::Arc;

    fn command(outcome: NodeOutcome) -> Command {
        match outcome {
            NodeOutcome::Command(c) => c,
            NodeOutcome::Suspend(_) => panic!("pipelines never suspend"),
        }
    }

    fn flooding(responses: Vec<saferplaces_core::provider::ProviderResponse>) -> (Graph, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let graph = graph_with(provider.clone(), vec![Arc::new(DefineRainTool), Arc::new(DefineModelTool)]);
        (graph, provider)
    }

    fn asked(text: &str) -> ConversationState {
        ConversationState {
            messages: vec![Message::system("ctx"), Message::user(text)],
            ..Default::default()
        }
    }

    #[test]
    fn call_ids_are_unique() {
        let args = Map::new();
        let a = call_id("t", &args);
        let b = call_id("t", &args);
        assert!(a.starts_with("call_"));
        assert_eq!(a.len(), "call_".len() + 24);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn entry_prefills_known_tools_only() {
        let reply = json!({
            names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL: {"rain_type": "uniform", "rain_mm": 80},
            "launch_rocket": {"when": "now"},
            names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL: "saferplaces",
        });
        let (graph, provider) = flooding(vec![text(&reply.to_string())]);
        let mut state = asked("simulate 80mm of uniform rain");

        let cmd = command(main(&graph, &FLOODING_RAINFALL, &state).await.unwrap());
        assert_eq!(cmd.goto, Goto::Node(NodeId::DefineRainRunner));
        state.apply(cmd.update);
        assert_eq!(state.param(names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL, "rain_mm"), Some(&json!(80)));
        assert!(state.params("launch_rocket").is_none());
        assert!(state.params(names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL).is_none());

        let prompt = &provider.requests()[0].messages[0].content;
        assert!(prompt.contains("simulate 80mm of uniform rain"));
        assert!(prompt.contains(names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL));
    }

    #[tokio::test]
    async fn unusable_prefill_still_starts_the_walk() {
        let (graph, _) = flooding(vec![text("I cannot tell")]);
        let cmd = command(main(&graph, &FLOODING_RAINFALL, &asked("flood please")).await.unwrap());
        assert_eq!(cmd.goto, Goto::Node(NodeId::DefineRainRunner));
        assert!(cmd.update.node_params.is_empty());
    }

    #[test]
    fn runner_builds_call_and_continuation() {
        let mut state = asked("x");
        state.apply(StateUpdate::new().params(
            names::CREATE_PROJECT_SELECT_BUILDINGS_TOOL,
            json!({"buildings_file": "s3://b/buildings.shp"}),
        ));
        let cmd = command(runner(&CREATE_PROJECT, NodeId::SelectBuildingsRunner, &state).unwrap());
        assert_eq!(cmd.goto, Goto::Node(NodeId::CreateProjectToolHandler));

        let call = cmd.update.messages[0].first_tool_call().unwrap().clone();
        assert_eq!(call.name, names::CREATE_PROJECT_SELECT_BUILDINGS_TOOL);
        assert_eq!(call.parse_arguments().unwrap()["buildings_file"], "s3://b/buildings.shp");

        state.apply(cmd.update);
        let on_end = state.param(names::CREATE_PROJECT_TOOL_HANDLER, "on_end").unwrap();
        assert_eq!(on_end["next"], names::CREATE_PROJECT_SELECT_INFILTRATION_TOOL_RUNNER);
        assert_eq!(on_end["main"], names::CREATE_PROJECT_MAIN);
    }

    #[test]
    fn last_runner_returns_to_main() {
        let cmd = command(runner(&FLOODING_RAINFALL, NodeId::DefineModelRunner, &asked("x")).unwrap());
        let mut state = asked("x");
        state.apply(cmd.update);
        let on_end = state.param(names::FLOODING_RAINFALL_TOOL_HANDLER, "on_end").unwrap();
        assert_eq!(on_end["next"], names::FLOODING_RAINFALL_MAIN);
    }

    #[tokio::test]
    async fn main_resumes_at_first_missing_output() {
        let (graph, provider) = flooding(vec![]);
        let mut state = asked("x");
        state.apply(StateUpdate::new().params(
            names::FLOODING_RAINFALL_MAIN,
            json!({"tool_outputs": {names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL: {"rain_type": "uniform"}}}),
        ));
        let cmd = command(main(&graph, &FLOODING_RAINFALL, &state).await.unwrap());
        assert_eq!(cmd.goto, Goto::Node(NodeId::DefineModelRunner));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn complete_pipeline_reports_consolidated_result() {
        let (graph, _) = flooding(vec![]);
        let mut state = asked("x");
        state.apply(StateUpdate::new().params(
            names::FLOODING_RAINFALL_MAIN,
            json!({"tool_outputs": {
                names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL: {"rain_type": "uniform"},
                names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL: null,
            }}),
        ));
        let cmd = command(main(&graph, &FLOODING_RAINFALL, &state).await.unwrap());
        assert_eq!(cmd.goto, Goto::End);
        let [call, result] = cmd.update.messages.as_slice() else {
            panic!("expected call and result");
        };
        let call = call.first_tool_call().unwrap();
        assert_eq!(call.name, names::FLOODING_RAINFALL_SUBGRAPH_INTERFACE_TOOL);
        assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
        let content: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(content[names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL]["rain_type"], "uniform");
        assert_eq!(cmd.update.node_params, vec![saferplaces_core::state::ParamsOp::Clear]);
    }
}
