//! QA manifest loading and the record types that flow through an evaluation.
//!
//! Two manifest dialects exist in the wild: recognition manifests are JSON
//! arrays of sample objects, forecasting manifests are JSON objects mapping a
//! sample key to the sample. Field names vary between dataset exports, so the
//! sample types carry serde aliases for every spelling observed.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ManifestError;

/// Which evaluation task a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Free-text or option-list action recognition over whole clips.
    Recognition,
    /// Multiple-choice action forecasting over explicit frame ranges.
    Forecasting,
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recognition" => Ok(TaskKind::Recognition),
            "forecasting" => Ok(TaskKind::Forecasting),
            other => Err(format!(
                "unknown task '{other}', expected 'recognition' or 'forecasting'"
            )),
        }
    }
}

/// A recognition sample: one clip, one question, a raw options string, and a
/// free-text ground truth.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecognitionSample {
    #[serde(alias = "video_id")]
    pub id: String,
    #[serde(rename = "Q", alias = "question")]
    pub question: String,
    /// Semi-structured options string, e.g. `1. ['run', 'jump']`.
    #[serde(rename = "Options", alias = "options", default)]
    pub options: Option<String>,
    #[serde(rename = "Ground Truth", alias = "ground_truth", alias = "answer")]
    pub ground_truth: String,
}

/// A forecasting sample: a frame range within a clip plus a multiple-choice
/// question whose answer is an index into `choices`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ForecastingSample {
    #[serde(alias = "id")]
    pub video_id: String,
    pub start_frame: u64,
    pub end_frame: u64,
    pub question: String,
    pub choices: Vec<String>,
    pub answer: usize,
}

impl ForecastingSample {
    /// The ground-truth choice string, if the answer index is in range.
    pub fn ground_truth(&self) -> Option<&str> {
        self.choices.get(self.answer).map(String::as_str)
    }
}

/// A sample of either task kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Recognition(RecognitionSample),
    Forecasting(ForecastingSample),
}

impl Sample {
    pub fn video_id(&self) -> &str {
        match self {
            Sample::Recognition(s) => &s.id,
            Sample::Forecasting(s) => &s.video_id,
        }
    }

    /// File name for the sample's clip under the video directory.
    ///
    /// Recognition clips are `<id>.mp4`; forecasting clips carry their frame
    /// range as `<id>_<start>_<end>.mp4`.
    pub fn video_file_name(&self) -> String {
        match self {
            Sample::Recognition(s) => format!("{}.mp4", s.id),
            Sample::Forecasting(s) => {
                format!("{}_{}_{}.mp4", s.video_id, s.start_frame, s.end_frame)
            }
        }
    }
}

/// A manifest entry that failed to deserialize. Kept so skip accounting can
/// cover load-time failures, not only runtime ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    /// Array index or mapping key of the entry.
    pub key: String,
    pub error: String,
}

/// A loaded QA manifest: well-formed samples plus the entries that were not.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub samples: Vec<Sample>,
    pub malformed: Vec<MalformedEntry>,
}

impl Manifest {
    /// Load a manifest from disk, accepting both the array and the mapping
    /// dialect. An unreadable file or unsupported root shape is fatal; a
    /// single malformed entry is recorded and does not fail the load.
    pub fn load(path: &Path, task: TaskKind) -> std::result::Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ManifestError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ManifestError::Io(e)
            }
        })?;
        let root: Value = serde_json::from_str(&text)?;

        let mut manifest = Manifest::default();
        match root {
            Value::Array(items) => {
                for (index, item) in items.into_iter().enumerate() {
                    manifest.push_entry(index.to_string(), item, task);
                }
            }
            Value::Object(entries) => {
                for (key, item) in entries {
                    manifest.push_entry(key, item, task);
                }
            }
            _ => {
                return Err(ManifestError::UnsupportedShape {
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(manifest)
    }

    fn push_entry(&mut self, key: String, item: Value, task: TaskKind) {
        let parsed = match task {
            TaskKind::Recognition => {
                serde_json::from_value::<RecognitionSample>(item).map(Sample::Recognition)
            }
            TaskKind::Forecasting => {
                serde_json::from_value::<ForecastingSample>(item).map(Sample::Forecasting)
            }
        };
        match parsed {
            Ok(sample) => self.samples.push(sample),
            Err(e) => {
                warn!(key = %key, error = %e, "skipping malformed manifest entry");
                self.malformed.push(MalformedEntry {
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Total entries seen at load time, well-formed or not.
    pub fn attempted(&self) -> usize {
        self.samples.len() + self.malformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.malformed.is_empty()
    }
}

/// One prediction produced by the inference phase. Created once per sample,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PredictionRecord {
    pub video_id: String,
    pub question: String,
    pub ground_truth: String,
    pub prediction: String,
}

/// Binary similarity verdict from the judge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchLabel {
    Yes,
    No,
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLabel::Yes => f.write_str("yes"),
            MatchLabel::No => f.write_str("no"),
        }
    }
}

/// One judged prediction: the numeric similarity score and its thresholded
/// verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeRecord {
    pub score: f64,
    #[serde(rename = "match")]
    pub label: MatchLabel,
}
