//! Frame extraction from video files.
//!
//! Frames are sampled uniformly across the clip duration and decoded to JPEG
//! by shelling out to `ffmpeg`/`ffprobe`, so the crate carries no codec
//! dependencies of its own.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::VideoError;

/// A single decoded frame as JPEG bytes.
#[derive(Debug, Clone)]
pub struct Frame(pub Vec<u8>);

/// Source of frames for a video file. The evaluation loop only depends on
/// this trait so tests can substitute canned frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn load_frames(&self, path: &Path) -> Result<Vec<Frame>, VideoError>;
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Compute `count` uniformly spaced timestamps over `duration` seconds.
///
/// A single frame is taken from the middle of the clip; otherwise the
/// timestamps span from the start to just short of the end, since seeking to
/// the exact duration often yields no frame.
pub fn sample_timestamps(duration: f64, count: usize) -> Vec<f64> {
    if count == 0 || duration <= 0.0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![duration / 2.0];
    }
    let span = (duration - 0.1).max(0.0);
    (0..count)
        .map(|i| i as f64 * span / (count - 1) as f64)
        .collect()
}

/// Frame source that decodes via the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    num_frames: usize,
}

impl FfmpegFrameSource {
    pub fn new(num_frames: usize) -> Self {
        Self { num_frames }
    }

    /// Run `ffprobe` and return the container duration in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, VideoError> {
        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .output()
            .await
            .map_err(VideoError::FfmpegMissing)?;

        if !output.status.success() {
            return Err(VideoError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| VideoError::Probe(e.to_string()))?;
        let duration = probe
            .format
            .duration
            .ok_or_else(|| VideoError::Probe("missing format.duration".to_string()))?;
        duration
            .parse::<f64>()
            .map_err(|e| VideoError::Probe(format!("bad duration '{duration}': {e}")))
    }

    /// Decode one JPEG frame at `timestamp` seconds.
    async fn decode_frame(&self, path: &Path, timestamp: f64) -> Result<Vec<u8>, VideoError> {
        let output = tokio::process::Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &format!("{timestamp:.3}")])
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2", "-c:v", "mjpeg", "pipe:1"])
            .output()
            .await
            .map_err(VideoError::FfmpegMissing)?;

        if !output.status.success() {
            return Err(VideoError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn load_frames(&self, path: &Path) -> Result<Vec<Frame>, VideoError> {
        if !path.exists() {
            return Err(VideoError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let duration = self.probe_duration(path).await?;
        let timestamps = sample_timestamps(duration, self.num_frames);
        debug!(path = %path.display(), duration, frames = timestamps.len(), "decoding frames");

        let mut frames = Vec::with_capacity(timestamps.len());
        for timestamp in timestamps {
            let bytes = self.decode_frame(path, timestamp).await?;
            if !bytes.is_empty() {
                frames.push(Frame(bytes));
            }
        }
        if frames.is_empty() {
            return Err(VideoError::NoFrames {
                path: path.to_path_buf(),
            });
        }
        Ok(frames)
    }
}

/// Frame source that returns the same canned frames for every path that
/// exists on disk. Used in tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct StaticFrameSource {
    frames: Vec<Frame>,
}

impl StaticFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }
}

#[async_trait]
impl FrameSource for StaticFrameSource {
    async fn load_frames(&self, path: &Path) -> Result<Vec<Frame>, VideoError> {
        if !path.exists() {
            return Err(VideoError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if self.frames.is_empty() {
            return Err(VideoError::NoFrames {
                path: path.to_path_buf(),
            });
        }
        Ok(self.frames.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_frame_comes_from_the_middle() {
        assert_eq!(sample_timestamps(10.0, 1), vec![5.0]);
    }

    #[test]
    fn timestamps_are_uniform_and_start_at_zero() {
        let ts = sample_timestamps(10.1, 5);
        assert_eq!(ts.len(), 5);
        assert_eq!(ts[0], 0.0);
        assert!((ts[4] - 10.0).abs() < 1e-9);
        let step = ts[1] - ts[0];
        for pair in ts.windows(2) {
            assert!((pair[1] - pair[0] - step).abs() < 1e-9);
        }
    }

    #[test]
    fn degenerate_inputs_yield_no_timestamps() {
        assert!(sample_timestamps(10.0, 0).is_empty());
        assert!(sample_timestamps(0.0, 4).is_empty());
        assert!(sample_timestamps(-1.0, 4).is_empty());
    }

    #[test]
    fn very_short_clip_clamps_to_start() {
        let ts = sample_timestamps(0.05, 3);
        assert_eq!(ts, vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let source = FfmpegFrameSource::new(4);
        let err = source
            .load_frames(Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::NotFound { .. }));
    }

    #[tokio::test]
    async fn static_source_returns_canned_frames() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = StaticFrameSource::new(vec![Frame(vec![1, 2, 3])]);
        let frames = source.load_frames(file.path()).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn static_source_without_frames_reports_no_frames() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = StaticFrameSource::default();
        let err = source.load_frames(file.path()).await.unwrap_err();
        assert!(matches!(err, VideoError::NoFrames { .. }));
    }
}
