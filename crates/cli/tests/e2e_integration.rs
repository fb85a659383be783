//! End-to-end tests for the SaferPlaces agent.
//!
//! These drive whole conversations through sessions built from an
//! `AppConfig`: the default tool set, in-memory storage, a scripted model
//! and a local stand-in for the SaferPlaces process API.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::{Json, Router, http::StatusCode, routing::post};
use saferplaces_agent::{AgentRuntime, Session, TurnEvent};
use saferplaces_config::{AppConfig, ProcessApiConfig};
use saferplaces_core::error::ProviderError;
use saferplaces_core::message::{Message, MessageToolCall, Role, ThreadId};
use saferplaces_core::names;
use saferplaces_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use serde_json::{Value, json};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    call_count: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => panic!("ScriptedProvider exhausted at call #{}", *count),
        }
    }
}

fn respond(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
    }
}

fn text_response(text: &str) -> ProviderResponse {
    respond(Message::assistant(text))
}

fn tool_response(name: &str, args: Value) -> ProviderResponse {
    let args = args.as_object().cloned().unwrap();
    respond(Message::tool_call(MessageToolCall::new(format!("call_{name}"), name, &args)))
}

// ── Mock process API ─────────────────────────────────────────────────────

/// A local process API answering every execution with a fixed reply.
async fn process_api(status: u16, reply: Value) -> (ProcessApiConfig, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let app = Router::new().route(
        "/processes/{process}/execution",
        post(move |Json(body): Json<Value>| {
            let reply = reply.clone();
            let captured = captured.clone();
            async move {
                captured.lock().unwrap().push(body);
                (StatusCode::from_u16(status).unwrap(), Json(reply))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ProcessApiConfig {
        root: format!("http://{addr}"),
        user: Some("agent".into()),
        token: Some("secret".into()),
        timeout_secs: 5,
    };
    (config, seen)
}

fn runtime(provider: Arc<ScriptedProvider>, saferplaces_api: Option<ProcessApiConfig>) -> Arc<AgentRuntime> {
    let mut config = AppConfig::default();
    config.storage.backend = "memory".into();
    if let Some(api) = saferplaces_api {
        config.saferplaces_api = api;
    }
    Arc::new(AgentRuntime::from_config(&config, provider).expect("runtime should build"))
}

async fn open(runtime: &Arc<AgentRuntime>, thread: &str) -> Session {
    Session::start(runtime.clone(), ThreadId::from(thread), "alice", "rimini")
        .await
        .expect("session should start")
}

fn kinds(events: &[TurnEvent]) -> Vec<&'static str> {
    events.iter().map(TurnEvent::event_type).collect()
}

fn tool_result(events: &[TurnEvent], index: usize) -> Value {
    let Some(TurnEvent::ToolResult { message }) = events.get(index) else {
        panic!("event #{index} is not a tool result: {events:?}");
    };
    serde_json::from_str(&message.content).unwrap()
}

// ── E2E: plain conversation ──────────────────────────────────────────────

#[tokio::test]
async fn e2e_plain_reply() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response(
        "SaferPlaces simulates pluvial floods.",
    )]));
    let runtime = runtime(provider.clone(), None);
    let session = open(&runtime, "plain").await;

    let events = session.prompt("What can you do?").await.collect().await;

    assert_eq!(kinds(&events), vec!["message"]);
    assert_eq!(provider.calls(), 1);
    assert!(session.pending().await.is_none());
}

// ── E2E: confirmation round trip against the process API ─────────────────

#[tokio::test]
async fn e2e_safer_rain_confirmed_and_executed() {
    let (api, requests) = process_api(200, json!({"water_depth_file": "s3://bucket/water.tif"})).await;
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(names::SAFER_RAIN_TOOL, json!({"dem": "s3://bucket/dem.tif", "rain": 50})),
        text_response("The flood map is ready."),
    ]));
    let runtime = runtime(provider.clone(), Some(api));
    let session = open(&runtime, "rain").await;

    // Turn 1: the call is proposed and needs confirmation.
    let events = session.prompt("Simulate 50mm of rain on my DEM").await.collect().await;
    assert_eq!(kinds(&events), vec!["message", "interrupt"]);
    let TurnEvent::Interrupt { interrupt } = &events[1] else {
        unreachable!()
    };
    assert_eq!(interrupt.tool_name, names::SAFER_RAIN_TOOL);
    assert_eq!(interrupt.args.get("mode"), Some(&json!("lambda")));
    assert!(requests.lock().unwrap().is_empty());

    // Turn 2: the user confirms; the process runs and its output is registered.
    let events = session.prompt("yes").await.collect().await;
    assert_eq!(kinds(&events), vec!["tool_result", "layers_updated", "message"]);
    assert_eq!(tool_result(&events, 0)["water_depth_file"], "s3://bucket/water.tif");

    let body = requests.lock().unwrap()[0].clone();
    assert_eq!(body["inputs"]["dem"], "s3://bucket/dem.tif");
    assert_eq!(body["inputs"]["rain"], 50);
    assert_eq!(body["inputs"]["user"], "agent");

    // The registry was written to the project bucket.
    let other = open(&runtime, "another-thread").await;
    let layers = other.layers().await;
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].src, "s3://bucket/water.tif");
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn e2e_remote_failure_is_reported_to_the_model() {
    let (api, _) = process_api(500, json!({"detail": "lambda crashed"})).await;
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(names::SAFER_RAIN_TOOL, json!({"dem": "s3://bucket/dem.tif", "rain": 50})),
        text_response("The simulation failed. Do you want to retry?"),
    ]));
    let runtime = runtime(provider, Some(api));
    let session = open(&runtime, "failure").await;

    session.prompt("flood it").await.collect().await;
    let events = session.prompt("go").await.collect().await;

    assert_eq!(kinds(&events), vec!["tool_result", "message"]);
    let error = tool_result(&events, 0)["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Failed to execute Safer Rain API: 500"), "{error}");

    // The model is told to explain the failure.
    let state = session.state().await;
    assert!(state
        .messages
        .iter()
        .any(|m| m.role == Role::System && m.content.contains("Safer Rain tool")));
    assert!(session.layers().await.is_empty());
}

#[tokio::test]
async fn e2e_denied_call_is_cancelled() {
    let (api, requests) = process_api(200, json!({"water_depth_file": "s3://bucket/water.tif"})).await;
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(names::SAFER_RAIN_TOOL, json!({"dem": "s3://bucket/dem.tif", "rain": 50})),
        text_response("Okay, I will not run it."),
    ]));
    let runtime = runtime(provider, Some(api));
    let session = open(&runtime, "deny").await;

    session.prompt("flood it").await.collect().await;
    let events = session.prompt("no").await.collect().await;

    assert_eq!(kinds(&events), vec!["tool_result", "message"]);
    assert_eq!(tool_result(&events, 0)["status"], "cancelled");
    assert!(requests.lock().unwrap().is_empty());

    let state = session.state().await;
    assert!(state.node_params.is_empty());
    assert!(state.node_history.contains(&names::CHATBOT_UPDATE_MESSAGES.to_string()));
}

// ── E2E: pipeline walk ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_flooding_pipeline_walks_every_step() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(
            names::FLOODING_RAINFALL_SUBGRAPH_INTERFACE_TOOL,
            json!({"user_request": "a flooding simulation with 80mm of rain"}),
        ),
        text_response(&json!({ names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL: {"rain_mm": 80} }).to_string()),
        text_response("Your simulation is configured."),
    ]));
    let runtime = runtime(provider.clone(), None);
    let session = open(&runtime, "pipeline").await;

    // MAIN prefills the rain step, whose runner asks for confirmation.
    let events = session.prompt("Set up a flooding simulation with 80mm of rain").await.collect().await;
    assert_eq!(kinds(&events), vec!["message", "interrupt"]);
    let TurnEvent::Interrupt { interrupt } = &events[1] else {
        unreachable!()
    };
    assert_eq!(interrupt.tool_name, names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL);
    assert_eq!(interrupt.args.get("rain_mm"), Some(&json!(80)));

    // Rain confirmed: the walk moves on to the model step.
    let events = session.prompt("yes").await.collect().await;
    assert_eq!(kinds(&events), vec!["tool_result", "message", "interrupt"]);
    assert_eq!(tool_result(&events, 0)["rain_type"], "uniform");
    let TurnEvent::Interrupt { interrupt } = &events[2] else {
        unreachable!()
    };
    assert_eq!(interrupt.tool_name, names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL);

    // Model confirmed: MAIN reports one consolidated result to the chatbot.
    let events = session.prompt("ok").await.collect().await;
    assert_eq!(kinds(&events), vec!["tool_result", "message", "tool_result", "message"]);
    let consolidated = tool_result(&events, 2);
    assert_eq!(consolidated[names::FLOODING_RAINFALL_DEFINE_RAIN_TOOL]["rain_mm"], 80);
    assert_eq!(consolidated[names::FLOODING_RAINFALL_DEFINE_MODEL_TOOL]["model_name"], "saferplaces");
    let TurnEvent::Message { message } = &events[3] else {
        unreachable!()
    };
    assert_eq!(message.content, "Your simulation is configured.");

    assert_eq!(provider.calls(), 3);
    assert!(session.state().await.node_params.is_empty());
}
