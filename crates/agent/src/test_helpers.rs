//! Shared test helpers for graph and session tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use saferplaces_core::error::{ProviderError, ToolError};
use saferplaces_core::message::{Message, MessageToolCall};
use saferplaces_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use saferplaces_core::rules::{ToolArgs, ValidationRules};
use saferplaces_core::tool::{AgentTool, GateDefaults, ToolContext, ToolOutput};
use saferplaces_tools::{Assistant, ToolRegistry};
use serde_json::{Value, json};

use crate::graph::Graph;

/// A mock provider that returns a sequence of scripted responses and
/// records every request it receives.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = self.calls();
        self.requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => panic!("ScriptedProvider: no response left for call #{call}"),
        }
    }
}

/// A plain text response.
pub fn text(content: &str) -> ProviderResponse {
    respond(Message::assistant(content))
}

/// A response carrying one tool call.
pub fn tool_call(name: &str, args: Value) -> ProviderResponse {
    let args = args.as_object().cloned().unwrap_or_default();
    respond(Message::tool_call(MessageToolCall::new(format!("call_{name}"), name, &args)))
}

fn respond(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A router tool standing in for a remote one: echoes its arguments, with
/// a required `place`.
pub struct EchoTool {
    pub name: &'static str,
    pub defaults: GateDefaults,
    pub runs: Arc<Mutex<Vec<ToolArgs>>>,
}

impl EchoTool {
    pub fn new(name: &'static str, defaults: GateDefaults) -> Self {
        Self {
            name,
            defaults,
            runs: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl AgentTool for EchoTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Echoes its arguments"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"place": {"type": "string"}}})
    }

    fn gate_defaults(&self) -> GateDefaults {
        self.defaults
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
            .rule("place", |a, _| a.is_missing("place").then(|| "A place must be provided.".to_string()))
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        self.runs.lock().unwrap().push(args.clone());
        Ok(ToolOutput::new(json!({ "echo": args })))
    }
}

pub fn graph_with(provider: Arc<ScriptedProvider>, tools: Vec<Arc<dyn AgentTool>>) -> Graph {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    let assistant = Assistant::new(provider.clone(), "mock-model");
    Graph::new(provider, "mock-model", registry, assistant)
}
