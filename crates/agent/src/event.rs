//! Events emitted while a turn runs.
//!
//! The gateway forwards them to clients as JSON (one object per line when
//! streaming) and the CLI renders them as they arrive.

use saferplaces_core::message::Message;
use saferplaces_core::state::LayerDescriptor;
use saferplaces_core::tool::Interrupt;
use serde::{Deserialize, Serialize};

/// Events emitted by a session during one turn.
///
/// - `message`        — a chatbot reply or tool-call request
/// - `tool_result`    — a tool finished (or was cancelled)
/// - `interrupt`      — the turn stopped; the next prompt answers it
/// - `layers_updated` — the project's layer registry changed
/// - `error`          — something failed; the turn was closed cleanly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Message { message: Message },

    ToolResult { message: Message },

    Interrupt { interrupt: Interrupt },

    /// The full registry after the change.
    LayersUpdated { layers: Vec<LayerDescriptor> },

    Error { message: String },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::ToolResult { .. } => "tool_result",
            Self::Interrupt { .. } => "interrupt",
            Self::LayersUpdated { .. } => "layers_updated",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saferplaces_core::rules::ToolArgs;
    use saferplaces_core::state::LayerType;
    use saferplaces_core::tool::InterruptType;

    #[test]
    fn event_serialization_message() {
        let event = TurnEvent::Message {
            message: Message::assistant("Hello"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"message""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_interrupt() {
        let event = TurnEvent::Interrupt {
            interrupt: Interrupt {
                content: "Proceed?".into(),
                interrupt_type: InterruptType::ExecutionConfirmation,
                tool_name: "safer_rain_tool".into(),
                args: ToolArgs::new(),
                pending_output: None,
                resumable: true,
                namespace: vec!["saferplaces_api_subgraph".into()],
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"interrupt""#));
        assert!(json.contains(r#""tool_name":"safer_rain_tool""#));
    }

    #[test]
    fn event_serialization_layers() {
        let event = TurnEvent::LayersUpdated {
            layers: vec![LayerDescriptor::new("dtm", "s3://b/dtm.tif", LayerType::Raster)],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"layers_updated""#));
        assert!(json.contains(r#""src":"s3://b/dtm.tif""#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            TurnEvent::Message {
                message: Message::assistant("x")
            }
            .event_type(),
            "message"
        );
        assert_eq!(
            TurnEvent::ToolResult {
                message: Message::tool_result("c", "t", "{}")
            }
            .event_type(),
            "tool_result"
        );
        assert_eq!(TurnEvent::LayersUpdated { layers: vec![] }.event_type(), "layers_updated");
        assert_eq!(
            TurnEvent::Error {
                message: "x".into()
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"error","message":"boom"}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        match event {
            TurnEvent::Error { message } => assert_eq!(message, "boom"),
            _ => panic!("Wrong variant"),
        }
    }
}
