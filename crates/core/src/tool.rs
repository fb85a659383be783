//! Agent tools and their invocation state machine.
//!
//! An [`AgentTool`] is immutable and shared by every session. The mutable
//! confirmation flags of one call live in a [`ToolGate`] owned by the caller,
//! so concurrent sessions never observe each other's gate state.
//!
//! [`invoke`] walks one call through:
//!
//! ```text
//! resolve (inference) → validate → execution gate → execute/replay → output gate → reset
//! ```
//!
//! and returns either a completed [`ToolOutcome`] or an [`Interrupt`] that
//! the tool handler node turns into a graph suspension.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::message::Message;
use crate::provider::ToolDefinition;
use crate::rules::{InferenceRules, ToolArgs, ValidationRules};
use crate::state::{ConversationState, LayerDescriptor};

/// Read-only view of the session handed to resolvers, validators and actions.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    pub state: &'a ConversationState,
    /// Storage prefix of the current user and project, e.g.
    /// `s3://bucket/root/user==u1/project==p1`.
    pub project_bucket: &'a str,
    pub now: DateTime<Utc>,
}

impl<'a> ToolContext<'a> {
    pub fn new(state: &'a ConversationState, project_bucket: &'a str) -> Self {
        Self {
            state,
            project_bucket,
            now: Utc::now(),
        }
    }

    /// Pin the clock.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn user_id(&self) -> &str {
        self.state.user_id.as_deref().unwrap_or("anonymous")
    }
}

/// The confirmation flags a tool starts every call with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDefaults {
    pub execution_confirmed: bool,
    pub output_confirmed: bool,
}

impl GateDefaults {
    /// Ask before running, return the output as is.
    pub const CONFIRM_EXECUTION: Self = Self {
        execution_confirmed: false,
        output_confirmed: true,
    };

    /// Run straight away, ask before keeping the output.
    pub const CONFIRM_OUTPUT: Self = Self {
        execution_confirmed: true,
        output_confirmed: false,
    };

    /// No confirmation at all.
    pub const NONE: Self = Self {
        execution_confirmed: true,
        output_confirmed: true,
    };
}

impl Default for GateDefaults {
    fn default() -> Self {
        Self::CONFIRM_EXECUTION
    }
}

/// Confirmation state carried across a suspension. Stored in `node_params`
/// by the interrupt node and consumed by the next handler run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_confirmed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_confirmed: Option<bool>,

    /// Output computed before the output gate suspended; replayed instead of
    /// executing again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_output: Option<ToolOutput>,
}

/// Per-invocation confirmation flags.
#[derive(Debug, Clone)]
pub struct ToolGate {
    defaults: GateDefaults,
    execution_confirmed: bool,
    output_confirmed: bool,
    replay: Option<ToolOutput>,
    resets: usize,
}

impl ToolGate {
    pub fn new(defaults: GateDefaults) -> Self {
        Self {
            defaults,
            execution_confirmed: defaults.execution_confirmed,
            output_confirmed: defaults.output_confirmed,
            replay: None,
            resets: 0,
        }
    }

    pub fn with_override(defaults: GateDefaults, gate: &GateOverride) -> Self {
        let mut this = Self::new(defaults);
        if let Some(confirmed) = gate.execution_confirmed {
            this.execution_confirmed = confirmed;
        }
        if let Some(confirmed) = gate.output_confirmed {
            this.output_confirmed = confirmed;
        }
        this.replay = gate.confirmed_output.clone();
        this
    }

    pub fn confirm_execution(&mut self) {
        self.execution_confirmed = true;
    }

    pub fn execution_confirmed(&self) -> bool {
        self.execution_confirmed
    }

    pub fn output_confirmed(&self) -> bool {
        self.output_confirmed
    }

    /// True when both flags equal the tool's defaults and nothing is queued
    /// for replay.
    pub fn is_reset(&self) -> bool {
        self.execution_confirmed == self.defaults.execution_confirmed
            && self.output_confirmed == self.defaults.output_confirmed
            && self.replay.is_none()
    }

    /// How many times the gate returned to its defaults.
    pub fn resets(&self) -> usize {
        self.resets
    }

    fn reset(&mut self) {
        self.execution_confirmed = self.defaults.execution_confirmed;
        self.output_confirmed = self.defaults.output_confirmed;
        self.replay = None;
        self.resets += 1;
    }
}

/// State changes a tool asks the caller to merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUpdates {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layer_registry: Vec<LayerDescriptor>,
}

impl ToolUpdates {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.layer_registry.is_empty()
    }
}

/// The value returned by a tool action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Result mapping, sent back to the model as the tool message content.
    pub content: Value,

    #[serde(default, skip_serializing_if = "ToolUpdates::is_empty")]
    pub updates: ToolUpdates,
}

impl ToolOutput {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            updates: ToolUpdates::default(),
        }
    }

    /// `{"error": message}` with no updates.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(json!({ "error": message.into() }))
    }

    /// An execution failure: the error plus a system instruction asking the
    /// router to explain it and offer a retry.
    pub fn execution_failure(tool_label: &str, message: impl Into<String>) -> Self {
        Self::error(message).with_message(Message::system(format!(
            "An error occurred while executing the {tool_label} tool. \
             Explain the error to the user and then ask if they want to retry or not."
        )))
    }

    pub fn with_layer(mut self, layer: LayerDescriptor) -> Self {
        self.updates.layer_registry.push(layer);
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.updates.messages.push(message);
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.content.get("error").and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }

    /// The content rendered as a tool message body.
    pub fn render(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Kind of suspension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InterruptType {
    ExecutionConfirmation,
    OutputConfirmation,
    Custom(String),
}

impl InterruptType {
    pub fn as_str(&self) -> &str {
        match self {
            InterruptType::ExecutionConfirmation => "execution_confirmation",
            InterruptType::OutputConfirmation => "output_confirmation",
            InterruptType::Custom(s) => s,
        }
    }
}

impl From<String> for InterruptType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "execution_confirmation" => InterruptType::ExecutionConfirmation,
            "output_confirmation" => InterruptType::OutputConfirmation,
            _ => InterruptType::Custom(s),
        }
    }
}

impl From<InterruptType> for String {
    fn from(t: InterruptType) -> Self {
        t.as_str().to_string()
    }
}

/// A request for user input that suspends the current tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Question shown to the user.
    pub content: String,

    pub interrupt_type: InterruptType,

    pub tool_name: String,

    /// Arguments after inference, the ones the user is asked about.
    pub args: ToolArgs,

    /// Output held back by the output gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_output: Option<ToolOutput>,

    #[serde(default = "default_resumable")]
    pub resumable: bool,

    /// `[subgraph, node]` path of the node that raised it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace: Vec<String>,
}

fn default_resumable() -> bool {
    true
}

/// A completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Arguments after inference.
    pub args: ToolArgs,
    pub output: ToolOutput,
}

/// Result of [`invoke`].
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Completed(ToolOutcome),
    Suspended(Interrupt),
}

/// A named, schema-validated action with a confirm-then-execute lifecycle.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Unique across the whole tool set.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    fn gate_defaults(&self) -> GateDefaults {
        GateDefaults::default()
    }

    fn inference_rules(&self) -> InferenceRules {
        InferenceRules::new()
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::new()
    }

    /// Run the side-effecting action. Failures that should reach the user
    /// are returned as error outputs, `Err` is reserved for failures the
    /// tool could not describe itself.
    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError>;

    /// Label used in error instructions, e.g. "SaferRain".
    fn label(&self) -> &str {
        self.name()
    }

    fn confirmation_prompt(&self, args: &ToolArgs) -> String {
        let mut prompt = format!("I'm about to run **{}** with these arguments:\n", self.label());
        for (key, value) in args.present() {
            prompt.push_str(&format!("- {key}: {value}\n"));
        }
        prompt.push_str("\nShall I proceed? You can also ask me to change any of them.");
        prompt
    }

    fn output_prompt(&self, output: &ToolOutput) -> String {
        format!(
            "**{}** produced this result:\n{}\n\nDo you want to keep it?",
            self.label(),
            output.render()
        )
    }

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Drive one tool call through the gate state machine.
///
/// The gate is restored to the tool's defaults exactly once before this
/// returns, whatever the outcome.
pub async fn invoke(
    tool: &dyn AgentTool,
    raw_args: ToolArgs,
    gate: &mut ToolGate,
    ctx: &ToolContext<'_>,
) -> Invocation {
    let step = run_gates(tool, raw_args, gate, ctx).await;
    gate.reset();
    step
}

async fn run_gates(
    tool: &dyn AgentTool,
    raw_args: ToolArgs,
    gate: &mut ToolGate,
    ctx: &ToolContext<'_>,
) -> Invocation {
    let mut args = raw_args;
    let name = tool.name();

    match tool.inference_rules().apply(&mut args, ctx).await {
        Ok(report) => {
            if report.unconfirmed {
                debug!(tool = %name, fields = ?report.changed, "inference requires confirmation");
                gate.execution_confirmed = false;
            }
        }
        Err(e) => {
            warn!(tool = %name, error = %e, "argument inference failed");
            let output = ToolOutput::execution_failure(tool.label(), e.to_string());
            return Invocation::Completed(ToolOutcome { args, output });
        }
    }

    if let Some(message) = tool.validation_rules().validate(&args, ctx) {
        info!(tool = %name, error = %message, "tool arguments rejected");
        return Invocation::Completed(ToolOutcome {
            args,
            output: ToolOutput::error(message),
        });
    }

    if !gate.execution_confirmed {
        return Invocation::Suspended(Interrupt {
            content: tool.confirmation_prompt(&args),
            interrupt_type: InterruptType::ExecutionConfirmation,
            tool_name: name.to_string(),
            args,
            pending_output: None,
            resumable: true,
            namespace: Vec::new(),
        });
    }

    let output = match gate.replay.take() {
        Some(output) => {
            debug!(tool = %name, "replaying confirmed output");
            output
        }
        None => {
            info!(tool = %name, "executing tool");
            match tool.execute(&args, ctx).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(tool = %name, error = %e, "tool execution failed");
                    ToolOutput::execution_failure(tool.label(), e.to_string())
                }
            }
        }
    };

    if !gate.output_confirmed && !output.is_error() {
        return Invocation::Suspended(Interrupt {
            content: tool.output_prompt(&output),
            interrupt_type: InterruptType::OutputConfirmation,
            tool_name: name.to_string(),
            args,
            pending_output: Some(output),
            resumable: true,
            namespace: Vec::new(),
        });
    }

    Invocation::Completed(ToolOutcome { args, output })
}
