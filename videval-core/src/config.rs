//! Configuration for videval.
//!
//! Uses `figment` for layered configuration: defaults -> `videval.toml` ->
//! `VIDEVAL_`-prefixed environment -> CLI args. All settings live in explicit
//! config structs handed to the components that need them.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings for the inference phase: the video-language model endpoint and
/// the local worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferConfig {
    /// Model name sent to the endpoint.
    pub model: String,
    /// OpenAI-compatible base URL, e.g. `http://localhost:8000/v1`.
    pub base_url: String,
    /// Environment variable consulted for the API key.
    pub api_key_env: String,
    /// API key override. Takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Conversation template identifier forwarded to the endpoint.
    pub conv_mode: String,
    /// Frames sampled uniformly per clip.
    pub num_frames: usize,
    /// Concurrent inference workers.
    pub workers: usize,
    pub temperature: f64,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            model: "video-llm".to_string(),
            base_url: "http://localhost:8000/v1".to_string(),
            api_key_env: "VLM_API_KEY".to_string(),
            api_key: None,
            conv_mode: "vlm_v1".to_string(),
            num_frames: 8,
            workers: 1,
            temperature: 0.2,
            max_tokens: 512,
            request_timeout_secs: 120,
        }
    }
}

/// Settings for the judge phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Primary judge model.
    pub model: String,
    /// Model used after a request is rejected as too large or malformed.
    pub fallback_model: String,
    pub base_url: String,
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Retry budget per prediction, including the first attempt.
    pub max_attempts: u32,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            fallback_model: "gpt-3.5-turbo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            max_attempts: 5,
            temperature: 0.0,
            request_timeout_secs: 120,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub infer: InferConfig,
    pub judge: JudgeConfig,
}

/// Load configuration from the layered sources.
///
/// An explicitly passed config file must exist; the default `videval.toml`
/// is merged only when present.
pub fn load_config(config_file: Option<&Path>) -> Result<EvalConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EvalConfig::default()));

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            figment = figment.merge(Toml::file("videval.toml"));
        }
    }

    figment = figment.merge(Env::prefixed("VIDEVAL_").split("__"));

    figment.extract().map_err(|e| ConfigError::Invalid {
        message: e.to_string(),
    })
}
