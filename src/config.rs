//! Application configuration loading.
//!
//! Reads `dbchat.yaml`, interpolates `${VAR}` / `${VAR:-default}` from the
//! environment, and deserializes into [`AppConfig`]. The resulting struct is
//! passed explicitly to the components that need it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::permissions::AutonomyLevel;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "dbchat.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DBCHAT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find dbchat.yaml")]
    NotFound,

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `dbchat.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Model endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible base URL, without the `/chat/completions` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Sent as a bearer token when present and non-empty.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Stream responses token by token (SSE) instead of one body.
    #[serde(default = "default_true")]
    pub streaming: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model_name: default_model_name(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming: true,
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    pub path: String,
}

/// Agent behavior settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub autonomy: AutonomyLevel,
    /// Messages kept in history, system prompt included.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Result sets up to this size are returned to the model in full.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
    /// Rows sampled from larger result sets.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            autonomy: AutonomyLevel::default(),
            max_history: default_max_history(),
            max_result_rows: default_max_result_rows(),
            sample_rows: default_sample_rows(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}
fn default_max_history() -> usize {
    12
}
fn default_max_result_rows() -> usize {
    20
}
fn default_sample_rows() -> usize {
    5
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: `DBCHAT_CONFIG`, then `dbchat.yaml` walking upward from `start`,
/// then `config.yaml` in the data directory.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "DBCHAT_CONFIG points to a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    let fallback = crate::data_dir().join("config.yaml");
    if fallback.exists() {
        return Ok(fallback);
    }

    Err(ConfigError::NotFound)
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse config text after environment interpolation.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let mut config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

    if config.model.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
        config.model.api_key = None;
    }
    config.database.path = expand_tilde(&config.database.path);

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
