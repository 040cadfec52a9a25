//! Dataset ID reconciliation: compare the IDs a QA manifest references with
//! the clips actually present in a video directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use crate::error::{ManifestError, VideoError};

/// Read the `id` field of every object in a JSON-array manifest.
///
/// Entries without an `id` are warned about and skipped; non-string ids are
/// stringified, matching how loosely these manifests are produced.
pub fn load_manifest_ids(path: &Path) -> Result<Vec<String>, ManifestError> {
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
    let Value::Array(items) = root else {
        return Err(ManifestError::UnsupportedShape {
            path: path.to_path_buf(),
        });
    };

    let mut ids = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item.get("id") {
            Some(Value::String(id)) => ids.push(id.trim().to_string()),
            Some(other) => ids.push(other.to_string()),
            None => warn!(index, "skipping entry without an 'id' field"),
        }
    }
    Ok(ids)
}

/// Collect file stems from `dir` for files whose extension is in `exts`
/// (matched case-insensitively, given with the leading dot).
pub fn load_video_ids(dir: &Path, exts: &[String]) -> Result<Vec<String>, VideoError> {
    if !dir.exists() {
        return Err(VideoError::DirectoryMissing {
            path: dir.to_path_buf(),
        });
    }
    let wanted: BTreeSet<String> = exts.iter().map(|e| e.to_lowercase()).collect();

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let suffix = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
        if let (Some(suffix), Some(stem)) = (suffix, path.file_stem()) {
            if wanted.contains(&suffix) {
                ids.push(stem.to_string_lossy().to_string());
            }
        }
    }
    Ok(ids)
}

/// Result of reconciling manifest IDs against directory IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Raw (pre-dedup) counts, for the summary.
    pub manifest_ids_raw: usize,
    pub video_ids_raw: usize,
    pub only_in_manifest: Vec<String>,
    pub only_in_videos: Vec<String>,
    pub intersection: Vec<String>,
}

impl ReconcileReport {
    pub fn manifest_unique(&self) -> usize {
        self.only_in_manifest.len() + self.intersection.len()
    }

    pub fn videos_unique(&self) -> usize {
        self.only_in_videos.len() + self.intersection.len()
    }
}

/// Compute set differences and the intersection, each sorted. With
/// `case_insensitive` both sides are lowercased before comparison.
pub fn reconcile(
    manifest_ids: &[String],
    video_ids: &[String],
    case_insensitive: bool,
) -> ReconcileReport {
    let normalize = |s: &String| {
        if case_insensitive {
            s.to_lowercase()
        } else {
            s.clone()
        }
    };
    let manifest_set: BTreeSet<String> = manifest_ids.iter().map(normalize).collect();
    let video_set: BTreeSet<String> = video_ids.iter().map(normalize).collect();

    ReconcileReport {
        manifest_ids_raw: manifest_ids.len(),
        video_ids_raw: video_ids.len(),
        only_in_manifest: manifest_set.difference(&video_set).cloned().collect(),
        only_in_videos: video_set.difference(&manifest_set).cloned().collect(),
        intersection: manifest_set.intersection(&video_set).cloned().collect(),
    }
}

/// Write the three ID lists as newline-delimited text files under
/// `save_dir`, creating it as needed. Returns the written paths.
pub fn write_report(save_dir: &Path, report: &ReconcileReport) -> std::io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(save_dir)?;
    let lists = [
        ("only_in_manifest_missing_videos", &report.only_in_manifest),
        ("only_in_videos_missing_manifest", &report.only_in_videos),
        ("intersection_ids", &report.intersection),
    ];
    let mut written = Vec::with_capacity(lists.len());
    for (name, ids) in lists {
        let path = save_dir.join(format!("{name}.txt"));
        std::fs::write(&path, ids.join("\n"))?;
        written.push(path);
    }
    Ok(written)
}
