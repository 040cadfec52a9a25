//! # videval Core
//!
//! Core library for the videval evaluation toolkit.
//! Provides QA manifest loading, frame extraction, the video-language model
//! client, the inference worker pool, the LLM-judge client, and the dataset
//! reconciliation utility.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod eval;
pub mod judge;
pub mod manifest;
pub mod model;
pub mod options;
pub mod output;
pub mod prompt;
pub mod reconcile;
pub mod video;

// Re-export commonly used types at the crate root.
pub use config::{EvalConfig, InferConfig, JudgeConfig};
pub use dispatch::{WorldInfo, shard_indices};
pub use error::{EvalError, LlmError, Result};
pub use eval::{EvalContext, SampleOutcome, SkipReason, run_inference};
pub use judge::{JudgeClient, JudgeVariant, accuracy};
pub use manifest::{JudgeRecord, Manifest, MatchLabel, PredictionRecord, Sample, TaskKind};
pub use model::{MockVlm, OpenAiCompatibleVlm, VideoLanguageModel};
pub use video::{FfmpegFrameSource, Frame, FrameSource};
