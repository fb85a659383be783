//! Client for the OGC-style process APIs (SaferPlaces, SaferCast).
//!
//! Every process is executed with
//! `POST {root}/processes/{process}/execution` and a body of
//! `{"inputs": {...args, user, token, debug}}`. The response is a JSON
//! object whose keys depend on the process.

use std::time::Duration;

use saferplaces_config::ProcessApiConfig;
use saferplaces_core::tool::ToolOutput;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{status} - {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Network(String),

    #[error("{0}")]
    Decode(String),
}

impl ApiError {
    /// Report the failure to the router. `api` names the service in the
    /// message, e.g. "Safer Rain".
    pub fn into_output(self, api: &str, tool_label: &str) -> ToolOutput {
        let message = match self {
            ApiError::Status { status, body } => format!("Failed to execute {api} API: {status} - {body}"),
            ApiError::Network(reason) => format!("Failed to execute {api} API: {reason}"),
            ApiError::Decode(body) => format!("Unexpected response from {api} API: {body}"),
        };
        ToolOutput::execution_failure(tool_label, message)
    }
}

/// A response that decoded but lacks the key the tool needs.
pub fn unexpected_response(api: &str, tool_label: &str, body: &Value) -> ToolOutput {
    ToolOutput::execution_failure(tool_label, format!("Unexpected response from {api} API: {body}"))
}

#[derive(Clone)]
pub struct ProcessClient {
    client: reqwest::Client,
    root: String,
    user: Option<String>,
    token: Option<String>,
}

impl std::fmt::Debug for ProcessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessClient")
            .field("root", &self.root)
            .field("user", &self.user)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProcessClient {
    pub fn new(config: &ProcessApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            root: config.root.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            token: config.token.clone(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn execution_url(&self, process: &str) -> String {
        format!("{}/processes/{process}/execution", self.root)
    }

    /// The request body: tool inputs plus credentials and the debug flag.
    pub fn payload(&self, inputs: &Map<String, Value>) -> Value {
        let mut inputs = inputs.clone();
        inputs.insert("user".into(), json!(self.user));
        inputs.insert("token".into(), json!(self.token));
        inputs.entry("debug").or_insert(Value::Bool(true));
        json!({ "inputs": inputs })
    }

    /// Execute `process` and return the decoded response body.
    pub async fn execute(&self, process: &str, inputs: &Map<String, Value>) -> Result<Value, ApiError> {
        let url = self.execution_url(process);
        debug!(%url, "executing process");

        let response = self
            .client
            .post(&url)
            .json(&self.payload(inputs))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        info!(process, status = status.as_u16(), "process API responded");
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|_| ApiError::Decode(body))
    }
}
