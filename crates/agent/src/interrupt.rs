//! Turning a user's reply into an interrupt resolution.

use async_trait::async_trait;
use saferplaces_core::error::GraphError;
use saferplaces_core::tool::Interrupt;
use saferplaces_tools::{AskRole, Assistant, parse_json_reply};
use serde_json::{Map, Value};
use tracing::debug;

const APPROVE: &[&str] = &["yes", "y", "ok", "okay", "sure", "confirm", "proceed", "go", "si"];
const DENY: &[&str] = &["no", "n", "cancel", "stop", "abort", "annulla"];

/// How a suspended tool call continues.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Run with the pending arguments; an output confirmation keeps the
    /// pending output.
    Approve,
    /// Run again with these arguments merged in, asking for confirmation
    /// anew.
    Modify(Map<String, Value>),
    /// Abandon the call.
    Deny,
    /// The reply could not be understood; ask again.
    Unclear,
}

/// Resolves one kind of interrupt. Register custom handlers on the
/// [`Graph`](crate::Graph) keyed by interrupt type.
#[async_trait]
pub trait InterruptHandler: Send + Sync {
    async fn resolve(&self, interrupt: &Interrupt, reply: &str) -> Result<Resolution, GraphError>;
}

/// Default handler for execution and output confirmations: keyword
/// replies first, the auxiliary model for anything else.
pub struct ConfirmationHandler {
    assistant: Assistant,
}

impl ConfirmationHandler {
    pub fn new(assistant: Assistant) -> Self {
        Self { assistant }
    }
}

/// Approve/deny keywords, ignoring case and trailing punctuation.
pub fn classify_keyword(reply: &str) -> Option<Resolution> {
    let word = reply
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase();
    if APPROVE.contains(&word.as_str()) {
        Some(Resolution::Approve)
    } else if DENY.contains(&word.as_str()) {
        Some(Resolution::Deny)
    } else {
        None
    }
}

/// Read `{"decision": ..., "args": {...}}` from the model's reply.
fn parse_decision(reply: &Value) -> Resolution {
    let args = reply
        .get("args")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    match reply.get("decision").and_then(Value::as_str) {
        Some("approve") => Resolution::Approve,
        Some("deny") => Resolution::Deny,
        Some("modify") if !args.is_empty() => Resolution::Modify(args),
        _ => Resolution::Unclear,
    }
}

#[async_trait]
impl InterruptHandler for ConfirmationHandler {
    async fn resolve(&self, interrupt: &Interrupt, reply: &str) -> Result<Resolution, GraphError> {
        if let Some(resolution) = classify_keyword(reply) {
            return Ok(resolution);
        }

        let args = serde_json::to_string(&interrupt.args).unwrap_or_default();
        let prompt = format!(
            "The assistant asked the user to confirm a tool call and the user replied.\n\
             Tool: {}\nArguments: {args}\nQuestion: {}\nUser reply: \"{reply}\"\n\n\
             Classify the reply. Answer with a JSON object only:\n\
             {{\"decision\": \"approve\" | \"deny\" | \"modify\", \"args\": {{...}}}}\n\
             Use \"modify\" when the user changes or adds arguments, and put only the changed \
             arguments in \"args\". Use the argument names listed above.",
            interrupt.tool_name, interrupt.content,
        );
        let reply = self.assistant.ask(AskRole::System, &prompt).await?;
        let resolution = match parse_json_reply(&reply) {
            Ok(decision) => parse_decision(&decision),
            Err(_) => Resolution::Unclear,
        };
        debug!(tool = %interrupt.tool_name, ?resolution, "reply classified by model");
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, text};
    use saferplaces_core::rules::ToolArgs;
    use saferplaces_core::tool::InterruptType;
    use serde_json::json;
    use std::sync::Arc;

    fn interrupt() -> Interrupt {
        Interrupt {
            content: "Shall I proceed?".into(),
            interrupt_type: InterruptType::ExecutionConfirmation,
            tool_name: "safer_rain_tool".into(),
            args: ToolArgs::new().with("rain", 50),
            pending_output: None,
            resumable: true,
            namespace: vec![],
        }
    }

    #[test]
    fn keywords() {
        assert_eq!(classify_keyword("Yes!"), Some(Resolution::Approve));
        assert_eq!(classify_keyword("  si "), Some(Resolution::Approve));
        assert_eq!(classify_keyword("Annulla."), Some(Resolution::Deny));
        assert_eq!(classify_keyword("yes but with 80mm"), None);
    }

    #[test]
    fn decisions() {
        assert_eq!(parse_decision(&json!({"decision": "approve"})), Resolution::Approve);
        assert_eq!(
            parse_decision(&json!({"decision": "modify", "args": {"rain": 80}})),
            Resolution::Modify(json!({"rain": 80}).as_object().cloned().unwrap())
        );
        assert_eq!(parse_decision(&json!({"decision": "modify"})), Resolution::Unclear);
        assert_eq!(parse_decision(&Value::Null), Resolution::Unclear);
    }

    #[tokio::test]
    async fn keyword_replies_skip_the_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let handler = ConfirmationHandler::new(Assistant::new(provider.clone(), "m"));
        assert_eq!(handler.resolve(&interrupt(), "ok").await.unwrap(), Resolution::Approve);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn free_text_goes_to_the_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![text(
            "```json\n{\"decision\": \"modify\", \"args\": {\"rain\": 80}}\n```",
        )]));
        let handler = ConfirmationHandler::new(Assistant::new(provider.clone(), "m"));
        let resolution = handler.resolve(&interrupt(), "make it 80mm").await.unwrap();
        assert_eq!(resolution, Resolution::Modify(json!({"rain": 80}).as_object().cloned().unwrap()));
        assert_eq!(provider.calls(), 1);
    }
}
