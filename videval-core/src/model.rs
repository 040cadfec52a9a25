//! Video-language model client.
//!
//! Targets any OpenAI-compatible multimodal chat-completions endpoint
//! (vLLM, LM Studio, hosted APIs): sampled frames travel as base64 data-URI
//! image parts alongside the question text.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::InferConfig;
use crate::error::LlmError;
use crate::video::Frame;

/// A model that answers a question about a sequence of video frames.
#[async_trait]
pub trait VideoLanguageModel: Send + Sync {
    async fn complete(&self, frames: &[Frame], prompt: &str) -> Result<String, LlmError>;
}

/// Client for an OpenAI-compatible multimodal endpoint.
#[derive(Debug)]
pub struct OpenAiCompatibleVlm {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    conv_mode: String,
    temperature: f64,
    max_tokens: u32,
    timeout_secs: u64,
}

impl OpenAiCompatibleVlm {
    /// Create a new client from configuration.
    ///
    /// Resolves the API key from `config.api_key`, then the environment
    /// variable named by `config.api_key_env`. Local endpoints (localhost,
    /// 127.0.0.1) fall back to a dummy bearer token.
    pub fn new(config: &InferConfig) -> Result<Self, LlmError> {
        let is_local =
            config.base_url.contains("localhost") || config.base_url.contains("127.0.0.1");

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    debug!("no API key set for local endpoint; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            conv_mode: config.conv_mode.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn build_request_body(&self, frames: &[Frame], prompt: &str) -> Value {
        let mut parts: Vec<Value> = frames
            .iter()
            .map(|frame| {
                json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/jpeg;base64,{}", BASE64.encode(&frame.0))
                    }
                })
            })
            .collect();
        parts.push(json!({"type": "text", "text": prompt}));

        json!({
            "model": self.model,
            "messages": [{"role": "user", "content": parts}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "conv_mode": self.conv_mode,
        })
    }
}

#[async_trait]
impl VideoLanguageModel for OpenAiCompatibleVlm {
    async fn complete(&self, frames: &[Frame], prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(frames, prompt);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, &self.base_url, self.timeout_secs))?;

        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }
        parse_completion(&text)
    }
}

/// Map an HTTP status code to the appropriate LlmError. Shared with the
/// judge client.
pub(crate) fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    match status.as_u16() {
        401 => {
            debug!(body = %body, "authentication failed (401)");
            LlmError::AuthFailed {
                provider: "OpenAI-compatible".to_string(),
            }
        }
        429 => {
            // Try to extract "try again in Xs" from the error message
            let retry_secs = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| {
                    v.get("error")?
                        .get("message")?
                        .as_str()
                        .map(|s| s.to_string())
                })
                .and_then(|msg| {
                    msg.split("in ")
                        .last()
                        .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                })
                .unwrap_or(5);
            LlmError::RateLimited {
                retry_after_secs: retry_secs,
            }
        }
        400 | 413 => LlmError::BadRequest {
            message: format!("rejected ({status}): {body}"),
        },
        s if s >= 500 => LlmError::ApiRequest {
            message: format!("server error ({s}): {body}"),
        },
        s => LlmError::ApiRequest {
            message: format!("unexpected status ({s}): {body}"),
        },
    }
}

/// Map a reqwest transport failure to the appropriate LlmError.
pub(crate) fn map_transport_error(e: reqwest::Error, endpoint: &str, timeout_secs: u64) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout { timeout_secs }
    } else if e.is_connect() {
        LlmError::Connection {
            message: format!("{endpoint}: {e}"),
        }
    } else {
        LlmError::ApiRequest {
            message: e.to_string(),
        }
    }
}

/// Extract the first choice's message content from a chat-completions reply.
pub(crate) fn parse_completion(body: &str) -> Result<String, LlmError> {
    let value: Value = serde_json::from_str(body).map_err(|e| LlmError::ResponseParse {
        message: format!("invalid JSON: {e}"),
    })?;
    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::ResponseParse {
            message: "missing choices[0].message.content".to_string(),
        })
}

/// Mock model for tests: pops queued responses in order and records the
/// prompts it was asked.
#[derive(Default)]
pub struct MockVlm {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockVlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, response: Result<String, LlmError>) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(response);
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl VideoLanguageModel for MockVlm {
    async fn complete(&self, _frames: &[Frame], prompt: &str) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .expect("mock lock poisoned")
            .push(prompt.to_string());
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok("mock response".to_string()))
    }
}
