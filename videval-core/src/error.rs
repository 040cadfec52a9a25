//! Error types for the videval core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering remote LLM calls, video decoding, manifest loading, and
//! configuration.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Top-level error type for the videval core library.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("video error: {0}")]
    Video(#[from] VideoError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from remote chat-completion calls, shared by the video-language
/// model client and the judge client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("request rejected by provider: {message}")]
    BadRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("authentication failed for {provider}")]
    AuthFailed { provider: String },

    #[error("rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("provider connection failed: {message}")]
    Connection { message: String },

    #[error("retry attempts exhausted after {attempts} tries")]
    AttemptsExhausted { attempts: u32 },
}

/// Errors from frame extraction.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("video file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("video directory not found: {path}")]
    DirectoryMissing { path: PathBuf },

    #[error("ffmpeg/ffprobe binary not found: {0}")]
    FfmpegMissing(std::io::Error),

    #[error("ffmpeg/ffprobe execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    Probe(String),

    #[error("no frames decoded from {path}")]
    NoFrames { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from QA manifest loading.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("manifest root is neither a JSON array nor an object: {path}")]
    UnsupportedShape { path: PathBuf },

    #[error("failed to parse manifest JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}
