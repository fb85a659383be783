//! Configuration loading, validation, and management for the SaferPlaces agent.
//!
//! Loads configuration from `~/.saferplaces/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.saferplaces/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Graph runtime settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// SaferPlaces process API (digital twin, SaferRain, SaferBuildings)
    #[serde(default = "default_saferplaces_api")]
    pub saferplaces_api: ProcessApiConfig,

    /// SaferCast process API (DPC radar, ICON-2I forecasts)
    #[serde(default = "default_safercast_api")]
    pub safercast_api: ProcessApiConfig,

    /// Object storage and checkpoints
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    4096
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("saferplaces_api", &self.saferplaces_api)
            .field("safercast_api", &self.safercast_api)
            .field("storage", &self.storage)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for ProcessApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessApiConfig")
            .field("root", &self.root)
            .field("user", &self.user)
            .field("token", &redact(&self.token))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum node executions per turn before the turn is aborted
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Tools the chatbot may bind. Empty binds every tool.
    #[serde(default)]
    pub available_tools: Vec<String>,

    /// When false the chatbot binds no tools at all
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
}

fn default_max_steps() -> usize {
    64
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            available_tools: Vec::new(),
            tools_enabled: true,
        }
    }
}

impl AgentConfig {
    /// The tool binding for a fresh turn: `Some([])` binds all tools,
    /// `None` binds none.
    pub fn tool_binding(&self) -> Option<Vec<String>> {
        self.tools_enabled.then(|| self.available_tools.clone())
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProcessApiConfig {
    /// Base URL, e.g. `http://localhost:5000`
    pub root: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_api_timeout() -> u64 {
    600
}

fn default_saferplaces_api() -> ProcessApiConfig {
    ProcessApiConfig {
        root: "http://localhost:5000".into(),
        user: None,
        token: None,
        timeout_secs: default_api_timeout(),
    }
}

fn default_safercast_api() -> ProcessApiConfig {
    ProcessApiConfig {
        root: "http://localhost:5002".into(),
        user: None,
        token: None,
        timeout_secs: default_api_timeout(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root URI under which per-user buckets live
    #[serde(default = "default_bucket_root")]
    pub bucket_root: String,

    /// "local" (filesystem mirror of the bucket) or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Directory that mirrors object storage when `backend = "local"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,

    /// Directory for per-thread checkpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
}

fn default_bucket_root() -> String {
    "s3://saferplaces.co/SaferPlaces-Agent/dev".into()
}
fn default_storage_backend() -> String {
    "local".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_root: default_bucket_root(),
            backend: default_storage_backend(),
            local_root: None,
            checkpoint_dir: None,
        }
    }
}

impl StorageConfig {
    /// Storage prefix of one user.
    pub fn user_bucket(&self, user_id: &str) -> String {
        format!("{}/user=={user_id}", self.bucket_root.trim_end_matches('/'))
    }

    /// Storage prefix of one user's project.
    pub fn project_bucket(&self, user_id: &str, project_id: &str) -> String {
        format!("{}/project=={project_id}", self.user_bucket(user_id))
    }

    pub fn local_root(&self) -> PathBuf {
        self.local_root
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("objects"))
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("checkpoints"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    5050
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.saferplaces/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// - `SAFERPLACES_API_KEY`, then `OPENAI_API_KEY` (only when no key is configured)
    /// - `SAFERPLACES_PROVIDER`, `SAFERPLACES_MODEL`
    /// - `SAFERPLACES_API_ROOT`, `SAFERPLACES_API_USER`, `SAFERPLACES_API_TOKEN`
    /// - `SAFERCAST_API_ROOT`, `SAFERCAST_API_USER`, `SAFERCAST_API_TOKEN`
    /// - `BUCKET_NAME` (bucket root)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("SAFERPLACES_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(provider) = lookup("SAFERPLACES_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("SAFERPLACES_MODEL") {
            self.default_model = model;
        }

        if let Some(root) = lookup("SAFERPLACES_API_ROOT") {
            self.saferplaces_api.root = root;
        }
        if let Some(user) = lookup("SAFERPLACES_API_USER") {
            self.saferplaces_api.user = Some(user);
        }
        if let Some(token) = lookup("SAFERPLACES_API_TOKEN") {
            self.saferplaces_api.token = Some(token);
        }

        if let Some(root) = lookup("SAFERCAST_API_ROOT") {
            self.safercast_api.root = root;
        }
        if let Some(user) = lookup("SAFERCAST_API_USER") {
            self.safercast_api.user = Some(user);
        }
        if let Some(token) = lookup("SAFERCAST_API_TOKEN") {
            self.safercast_api.token = Some(token);
        }

        if let Some(bucket) = lookup("BUCKET_NAME") {
            self.storage.bucket_root = bucket;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".saferplaces")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be > 0".into()));
        }

        if self.gateway.port == 0 {
            return Err(ConfigError::ValidationError("gateway.port must be > 0".into()));
        }

        if self.storage.bucket_root.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.bucket_root must not be empty".into(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "local" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown storage.backend '{}' (expected 'local' or 'memory')",
                self.storage.backend
            )));
        }

        for (name, api) in [("saferplaces_api", &self.saferplaces_api), ("safercast_api", &self.safercast_api)] {
            if !(api.root.starts_with("http://") || api.root.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "{name}.root must be an http(s) URL"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            saferplaces_api: default_saferplaces_api(),
            safercast_api: default_safercast_api(),
            storage: StorageConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.saferplaces_api.root, "http://localhost:5000");
        assert_eq!(config.safercast_api.root, "http://localhost:5002");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.storage.bucket_root, config.storage.bucket_root);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_storage_backend_rejected() {
        let mut config = AppConfig::default();
        config.storage.backend = "ftp".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().default_provider, "openai");
    }

    #[test]
    fn load_from_file_reads_api_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_model = "gpt-4o"

[saferplaces_api]
root = "https://api.saferplaces.co"
user = "demo"

[agent]
available_tools = ["safer_rain_tool"]
"#,
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.saferplaces_api.root, "https://api.saferplaces.co");
        assert_eq!(config.saferplaces_api.user.as_deref(), Some("demo"));
        assert_eq!(config.agent.tool_binding(), Some(vec!["safer_rain_tool".to_string()]));
        assert_eq!(config.safercast_api.root, "http://localhost:5002");
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("SAFERPLACES_API_ROOT", "https://sp.example"),
            ("SAFERCAST_API_TOKEN", "cast-token"),
            ("BUCKET_NAME", "s3://other/root"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.saferplaces_api.root, "https://sp.example");
        assert_eq!(config.safercast_api.token.as_deref(), Some("cast-token"));
        assert_eq!(config.storage.project_bucket("u1", "p1"), "s3://other/root/user==u1/project==p1");
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret".into());
        config.safercast_api.token = Some("tok-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("tok-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn disabled_tools_bind_nothing() {
        let agent = AgentConfig {
            tools_enabled: false,
            ..AgentConfig::default()
        };
        assert_eq!(agent.tool_binding(), None);
        assert_eq!(AgentConfig::default().tool_binding(), Some(vec![]));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("5050"));
    }
}
