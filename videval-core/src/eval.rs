//! The inference loop: one parameterized path for both tasks.
//!
//! A sample never aborts the run. Every failure mode becomes a tagged
//! `SampleOutcome::Skipped` so the final accounting can state exactly what
//! was attempted, recorded, and skipped, and why.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::dispatch::run_pool;
use crate::manifest::{Manifest, PredictionRecord, Sample};
use crate::model::VideoLanguageModel;
use crate::prompt::{forecasting_prompt, recognition_prompt};
use crate::video::FrameSource;

/// Why a sample produced no prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingVideo(PathBuf),
    DecodeFailed(String),
    MalformedSample(String),
    ModelFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingVideo(path) => write!(f, "video not found: {}", path.display()),
            SkipReason::DecodeFailed(msg) => write!(f, "frame decoding failed: {msg}"),
            SkipReason::MalformedSample(msg) => write!(f, "malformed sample: {msg}"),
            SkipReason::ModelFailed(msg) => write!(f, "model call failed: {msg}"),
        }
    }
}

/// Outcome of evaluating one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Recorded(PredictionRecord),
    Skipped { video_id: String, reason: SkipReason },
}

impl SampleOutcome {
    pub fn record(&self) -> Option<&PredictionRecord> {
        match self {
            SampleOutcome::Recorded(record) => Some(record),
            SampleOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, SampleOutcome::Skipped { .. })
    }
}

/// Shared per-run context for the evaluation loop. The task kind is carried
/// by each `Sample`, so only the clip location lives here.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub video_dir: PathBuf,
}

/// Evaluate one sample: locate the clip, build the task prompt, decode
/// frames, and query the model.
pub async fn evaluate_sample(
    sample: &Sample,
    ctx: &EvalContext,
    frames: &dyn FrameSource,
    model: &dyn VideoLanguageModel,
) -> SampleOutcome {
    let video_id = sample.video_id().to_string();
    let video_path = ctx.video_dir.join(sample.video_file_name());

    let skip = |reason: SkipReason| {
        warn!(video_id = %video_id, reason = %reason, "skipping sample");
        SampleOutcome::Skipped {
            video_id: video_id.clone(),
            reason,
        }
    };

    if !video_path.exists() {
        return skip(SkipReason::MissingVideo(video_path));
    }

    let (prompt, question, ground_truth) = match sample {
        Sample::Recognition(s) => (
            recognition_prompt(&s.question, s.options.as_deref()),
            s.question.clone(),
            s.ground_truth.clone(),
        ),
        Sample::Forecasting(s) => {
            let Some(ground_truth) = s.ground_truth() else {
                return skip(SkipReason::MalformedSample(format!(
                    "answer index {} out of range for {} choices",
                    s.answer,
                    s.choices.len()
                )));
            };
            (
                forecasting_prompt(&s.question, &s.choices),
                s.question.clone(),
                ground_truth.to_string(),
            )
        }
    };

    let decoded = match frames.load_frames(&video_path).await {
        Ok(decoded) => decoded,
        Err(error) => return skip(SkipReason::DecodeFailed(error.to_string())),
    };

    match model.complete(&decoded, &prompt).await {
        Ok(prediction) => SampleOutcome::Recorded(PredictionRecord {
            video_id: video_id.clone(),
            question,
            ground_truth,
            prediction,
        }),
        Err(error) => skip(SkipReason::ModelFailed(error.to_string())),
    }
}

/// Run inference over a manifest shard.
///
/// Manifest entries that failed to parse at load time are surfaced as skips
/// ahead of the evaluated outcomes, so `outcomes.len()` equals the number of
/// attempted entries.
pub async fn run_inference(
    manifest: Manifest,
    ctx: EvalContext,
    frames: Arc<dyn FrameSource>,
    model: Arc<dyn VideoLanguageModel>,
    workers: usize,
) -> Vec<SampleOutcome> {
    let mut outcomes: Vec<SampleOutcome> = manifest
        .malformed
        .iter()
        .map(|entry| SampleOutcome::Skipped {
            video_id: entry.key.clone(),
            reason: SkipReason::MalformedSample(entry.error.clone()),
        })
        .collect();

    let evaluated = run_pool(
        Arc::new(manifest.samples),
        Arc::new(ctx),
        frames,
        model,
        workers,
    )
    .await;
    outcomes.extend(evaluated);
    outcomes
}

/// Split outcomes into the records to write and the skips to report.
pub fn split_outcomes(
    outcomes: Vec<SampleOutcome>,
) -> (Vec<PredictionRecord>, Vec<(String, SkipReason)>) {
    let mut records = Vec::new();
    let mut skips = Vec::new();
    for outcome in outcomes {
        match outcome {
            SampleOutcome::Recorded(record) => records.push(record),
            SampleOutcome::Skipped { video_id, reason } => skips.push((video_id, reason)),
        }
    }
    (records, skips)
}
