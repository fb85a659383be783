//! Auxiliary language model queries.
//!
//! Tools and the interrupt node occasionally need a one-shot answer from the
//! model outside the conversation: a bounding box for a place name, a file
//! name for an output layer, a classification of the user's reply. The
//! [`Assistant`] wraps a provider for these side queries.

use std::sync::Arc;

use saferplaces_core::error::ProviderError;
use saferplaces_core::message::Message;
use saferplaces_core::provider::{Provider, ProviderRequest};
use serde_json::Value;
use tracing::debug;

/// Role of the single message sent by [`Assistant::ask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskRole {
    System,
    User,
}

#[derive(Clone)]
pub struct Assistant {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl Assistant {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one message and return the raw text of the reply.
    pub async fn ask(&self, role: AskRole, text: &str) -> Result<String, ProviderError> {
        let message = match role {
            AskRole::System => Message::system(text),
            AskRole::User => Message::user(text),
        };
        let mut request = ProviderRequest::new(&self.model, vec![message]);
        request.temperature = self.temperature;

        let response = self.provider.complete(request).await?;
        debug!(model = %response.model, chars = response.message.content.len(), "auxiliary query answered");
        Ok(response.message.content)
    }

    /// Send one message and parse the reply as JSON.
    pub async fn ask_json(&self, role: AskRole, text: &str) -> Result<Value, ProviderError> {
        let reply = self.ask(role, text).await?;
        parse_json_reply(&reply)
    }
}

/// Parse a model reply that should contain a single JSON value.
///
/// Accepts a bare value or one wrapped in a markdown code fence. The
/// literals `None` and `null` parse to [`Value::Null`].
pub fn parse_json_reply(reply: &str) -> Result<Value, ProviderError> {
    let text = strip_fence(reply.trim());
    if text.is_empty() || text == "None" || text == "null" {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ProviderError::InvalidResponse(format!("{e}: {text}")))
}

fn strip_fence(text: &str) -> &str {
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
