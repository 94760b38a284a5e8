//! Configuration management for the pipeline agent.
//!
//! Configuration can be set via environment variables:
//! - `LLM_API_KEY` - Required. API key for the model endpoint.
//! - `LLM_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. Model identifier. Defaults to `gpt-4o-mini`.
//! - `TEMPERATURE` - Optional. Sampling temperature. Unset by default.
//! - `MAX_ATTEMPTS` - Optional. Pipeline validation attempts per exchange. Defaults to `3`.
//! - `TOOL_ROUND_LIMIT` - Optional. Tool rounds before a final answer is forced. Defaults to `12`.
//! - `ACTION_EXECUTOR_URL` - Optional. Base URL of the HTTP browser driver.
//! - `SNAPSHOT_DIR` - Optional. Where snapshots are stored. Defaults to `./snapshots`.
//! - `EXPECT_ARTIFACT` - Optional. Validate plain answers as pipelines. Defaults to `true`.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::agent::AgentOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model endpoint API key
    pub api_key: String,

    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: String,

    pub default_model: String,

    pub temperature: Option<f32>,

    pub max_attempts: usize,

    pub tool_round_limit: usize,

    /// Browser driver; pipelines are authored without browsing when unset
    pub action_executor_url: Option<String>,

    pub snapshot_dir: PathBuf,

    pub expect_artifact: bool,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `LLM_API_KEY` is not set, and
    /// `ConfigError::InvalidValue` if an optional variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))?;

        let defaults = AgentOptions::default();

        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let default_model = std::env::var("DEFAULT_MODEL").unwrap_or(defaults.model);

        let temperature = parse_var::<f32>("TEMPERATURE")?;

        let max_attempts = parse_var("MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let tool_round_limit =
            parse_var("TOOL_ROUND_LIMIT")?.unwrap_or(defaults.tool_round_limit);

        let action_executor_url = std::env::var("ACTION_EXECUTOR_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let snapshot_dir = std::env::var("SNAPSHOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("snapshots"));

        let expect_artifact = std::env::var("EXPECT_ARTIFACT")
            .ok()
            .map(|v| {
                parse_bool(&v).map_err(|e| ConfigError::InvalidValue("EXPECT_ARTIFACT".to_string(), e))
            })
            .transpose()?
            .unwrap_or(defaults.expect_artifact);

        Ok(Self {
            api_key,
            base_url,
            default_model,
            temperature,
            max_attempts,
            tool_round_limit,
            action_executor_url,
            snapshot_dir,
            expect_artifact,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, base_url: String) -> Self {
        let defaults = AgentOptions::default();
        Self {
            api_key,
            base_url,
            default_model: defaults.model,
            temperature: defaults.temperature,
            max_attempts: defaults.max_attempts,
            tool_round_limit: defaults.tool_round_limit,
            action_executor_url: None,
            snapshot_dir: PathBuf::from("snapshots"),
            expect_artifact: defaults.expect_artifact,
        }
    }

    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            model: self.default_model.clone(),
            temperature: self.temperature,
            max_attempts: self.max_attempts,
            tool_round_limit: self.tool_round_limit,
            expect_artifact: self.expect_artifact,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .ok()
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))
        })
        .transpose()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
