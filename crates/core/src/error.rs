//! Error types for the SaferPlaces domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all SaferPlaces operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Graph routing errors ---
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Session errors ---
    #[error("Thread '{thread}' is already open for another user or project")]
    ThreadInUse { thread: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unparseable model output: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Argument inference failed for '{field}': {reason}")]
    InferenceFailed { field: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Routing and state errors raised by graph nodes. Each one ends the
/// current turn with a diagnostic message.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("No tool call found in the last message for node '{node}'")]
    MissingToolCall { node: String },

    #[error("Node '{node}' has no tool named '{tool}'")]
    UnknownTool { node: String, tool: String },

    #[error("Interrupt package for node '{node}' is missing or malformed: {reason}")]
    MissingInterruptPackage { node: String, reason: String },

    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    #[error("Turn exceeded {0} graph steps")]
    StepLimit(usize),

    #[error("Language model call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid node parameters: {0}")]
    InvalidParams(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Unsupported storage URI: {0}")]
    UnsupportedUri(String),

    #[error("Corrupt document at {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn graph_error_displays_node_and_tool() {
        let err = Error::Graph(GraphError::UnknownTool {
            node: "demo_tool_handler".into(),
            tool: "launch_rocket".into(),
        });
        assert!(err.to_string().contains("demo_tool_handler"));
        assert!(err.to_string().contains("launch_rocket"));
    }

    #[test]
    fn inference_error_names_field() {
        let err = ToolError::InferenceFailed {
            field: "area".into(),
            reason: "model returned no bbox".into(),
        };
        assert!(err.to_string().contains("'area'"));
    }
}
