//! Work distribution: manifest sharding across launcher-spawned processes
//! and the in-process worker pool.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::eval::{EvalContext, SampleOutcome, evaluate_sample};
use crate::manifest::{Manifest, Sample};
use crate::model::VideoLanguageModel;
use crate::video::FrameSource;

/// Position of this process in a multi-process launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldInfo {
    pub rank: usize,
    pub world_size: usize,
}

impl WorldInfo {
    /// The only process in a single-process run.
    pub const SINGLE: WorldInfo = WorldInfo {
        rank: 0,
        world_size: 1,
    };

    pub fn new(rank: usize, world_size: usize) -> Self {
        Self { rank, world_size }
    }

    /// Read `RANK` and `WORLD_SIZE` from the environment, as set by
    /// torchrun-style launchers. Missing or invalid values mean a
    /// single-process run.
    pub fn from_env() -> Self {
        let rank = std::env::var("RANK").ok().and_then(|v| v.parse().ok());
        let world_size = std::env::var("WORLD_SIZE")
            .ok()
            .and_then(|v| v.parse().ok());
        match (rank, world_size) {
            (Some(rank), Some(world_size)) if world_size > 0 && rank < world_size => {
                Self { rank, world_size }
            }
            _ => Self::SINGLE,
        }
    }

    /// Rank 0 owns shared side effects: output-directory creation, progress
    /// logging, load-time skip accounting.
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }
}

/// Partition `0..total` into stride shards: shard `r` gets indices
/// `{r, r + w, r + 2w, ...}`. Shards are disjoint and cover every index.
pub fn shard_indices(total: usize, world_size: usize) -> Vec<Vec<usize>> {
    let world_size = world_size.max(1);
    let mut shards = vec![Vec::new(); world_size];
    for index in 0..total {
        shards[index % world_size].push(index);
    }
    shards
}

/// Reduce a manifest to this rank's stride shard. Malformed entries are kept
/// only on the coordinator so each load failure is reported exactly once.
pub fn shard_manifest(manifest: Manifest, world: WorldInfo) -> Manifest {
    if world.world_size <= 1 {
        return manifest;
    }
    let samples = manifest
        .samples
        .into_iter()
        .enumerate()
        .filter(|(index, _)| index % world.world_size == world.rank)
        .map(|(_, sample)| sample)
        .collect();
    let malformed = if world.is_coordinator() {
        manifest.malformed
    } else {
        Vec::new()
    };
    Manifest { samples, malformed }
}

/// Evaluate samples on `workers` concurrent tasks.
///
/// Samples are stride-sharded across workers. Each worker evaluates its
/// shard and sends its completed outcome list once over a single collector
/// channel; the collector reassembles the lists in worker order, so the
/// merged output is deterministic for a given worker count.
pub async fn run_pool(
    samples: Arc<Vec<Sample>>,
    ctx: Arc<EvalContext>,
    frames: Arc<dyn FrameSource>,
    model: Arc<dyn VideoLanguageModel>,
    workers: usize,
) -> Vec<SampleOutcome> {
    let workers = workers.max(1).min(samples.len().max(1));
    let (tx, mut rx) = mpsc::channel::<(usize, Vec<SampleOutcome>)>(workers);

    for (worker, shard) in shard_indices(samples.len(), workers).into_iter().enumerate() {
        let samples = Arc::clone(&samples);
        let ctx = Arc::clone(&ctx);
        let frames = Arc::clone(&frames);
        let model = Arc::clone(&model);
        let tx = tx.clone();
        tokio::spawn(async move {
            let total = shard.len();
            let mut outcomes = Vec::with_capacity(total);
            for (done, index) in shard.into_iter().enumerate() {
                let outcome = evaluate_sample(&samples[index], &ctx, &*frames, &*model).await;
                outcomes.push(outcome);
                if worker == 0 {
                    info!(done = done + 1, total, "worker 0 progress");
                }
            }
            if tx.send((worker, outcomes)).await.is_err() {
                warn!(worker, "collector dropped before worker finished");
            }
        });
    }
    drop(tx);

    let mut partials: Vec<(usize, Vec<SampleOutcome>)> = Vec::with_capacity(workers);
    while let Some(partial) = rx.recv().await {
        partials.push(partial);
    }
    partials.sort_by_key(|(worker, _)| *worker);
    partials
        .into_iter()
        .flat_map(|(_, outcomes)| outcomes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shards_are_disjoint_and_cover_everything() {
        let shards = shard_indices(10, 3);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0], vec![0, 3, 6, 9]);
        assert_eq!(shards[1], vec![1, 4, 7]);
        assert_eq!(shards[2], vec![2, 5, 8]);

        let mut all: Vec<usize> = shards.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn more_shards_than_items_leaves_empties() {
        let shards = shard_indices(2, 4);
        assert_eq!(shards[0], vec![0]);
        assert_eq!(shards[1], vec![1]);
        assert!(shards[2].is_empty());
        assert!(shards[3].is_empty());
    }

    #[test]
    fn world_info_env_parsing() {
        // Env-var tests mutate process state, so they run in one test.
        unsafe {
            std::env::remove_var("RANK");
            std::env::remove_var("WORLD_SIZE");
        }
        assert_eq!(WorldInfo::from_env(), WorldInfo::SINGLE);

        unsafe {
            std::env::set_var("RANK", "1");
            std::env::set_var("WORLD_SIZE", "4");
        }
        assert_eq!(WorldInfo::from_env(), WorldInfo::new(1, 4));

        // Rank out of range falls back to single-process.
        unsafe {
            std::env::set_var("RANK", "4");
        }
        assert_eq!(WorldInfo::from_env(), WorldInfo::SINGLE);

        unsafe {
            std::env::remove_var("RANK");
            std::env::remove_var("WORLD_SIZE");
        }
    }

    #[tokio::test]
    async fn pool_merges_worker_shards_in_worker_order() {
        use crate::manifest::RecognitionSample;
        use crate::model::MockVlm;
        use crate::video::{Frame, StaticFrameSource};

        let dir = tempfile::tempdir().unwrap();
        let mut samples = Vec::new();
        for i in 0..5 {
            let id = format!("S{i}");
            std::fs::write(dir.path().join(format!("{id}.mp4")), b"stub").unwrap();
            samples.push(Sample::Recognition(RecognitionSample {
                id,
                question: "q".into(),
                options: None,
                ground_truth: "gt".into(),
            }));
        }
        let ctx = Arc::new(EvalContext {
            video_dir: dir.path().to_path_buf(),
        });
        let frames: Arc<dyn FrameSource> =
            Arc::new(StaticFrameSource::new(vec![Frame(vec![0xFF, 0xD8])]));
        let model: Arc<dyn VideoLanguageModel> = Arc::new(MockVlm::new());

        let outcomes = run_pool(Arc::new(samples), ctx, frames, model, 2).await;

        // Worker 0 evaluated {0, 2, 4}, worker 1 evaluated {1, 3}; the
        // collected order is worker order, stride order within a worker.
        let ids: Vec<String> = outcomes
            .iter()
            .map(|o| o.record().expect("all recorded").video_id.clone())
            .collect();
        assert_eq!(ids, vec!["S0", "S2", "S4", "S1", "S3"]);
    }

    #[test]
    fn shard_manifest_strides_and_keeps_malformed_on_coordinator() {
        use crate::manifest::{MalformedEntry, RecognitionSample};

        let sample = |id: &str| {
            Sample::Recognition(RecognitionSample {
                id: id.to_string(),
                question: "q".into(),
                options: None,
                ground_truth: "gt".into(),
            })
        };
        let manifest = Manifest {
            samples: vec![sample("A"), sample("B"), sample("C"), sample("D")],
            malformed: vec![MalformedEntry {
                key: "4".into(),
                error: "missing field".into(),
            }],
        };

        let rank0 = shard_manifest(manifest.clone(), WorldInfo::new(0, 2));
        assert_eq!(rank0.samples.len(), 2);
        assert_eq!(rank0.samples[0].video_id(), "A");
        assert_eq!(rank0.samples[1].video_id(), "C");
        assert_eq!(rank0.malformed.len(), 1);

        let rank1 = shard_manifest(manifest, WorldInfo::new(1, 2));
        assert_eq!(rank1.samples[0].video_id(), "B");
        assert_eq!(rank1.samples[1].video_id(), "D");
        assert!(rank1.malformed.is_empty());
    }
}
