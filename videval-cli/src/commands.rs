//! Subcommand handlers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use tracing::info;

use videval_core::config::{InferConfig, JudgeConfig};
use videval_core::dispatch::{WorldInfo, shard_manifest};
use videval_core::eval::{EvalContext, SkipReason, split_outcomes};
use videval_core::judge::{JudgeClient, JudgeVariant, accuracy};
use videval_core::manifest::{JudgeRecord, Manifest, PredictionRecord, TaskKind};
use videval_core::model::OpenAiCompatibleVlm;
use videval_core::output::write_json_pretty;
use videval_core::video::FfmpegFrameSource;
use videval_core::{eval, reconcile};

#[derive(Args, Debug)]
pub struct InferArgs {
    /// Task kind: recognition or forecasting
    #[arg(long)]
    pub task: String,

    /// Path to the QA manifest JSON
    #[arg(long)]
    pub qa_file: PathBuf,

    /// Directory containing the video files
    #[arg(long)]
    pub video_dir: PathBuf,

    /// Directory for the results JSON
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Base name of the results file (".json" is appended)
    #[arg(long)]
    pub output_name: String,

    /// Model name override
    #[arg(long)]
    pub model: Option<String>,

    /// Endpoint base URL override
    #[arg(long)]
    pub base_url: Option<String>,

    /// Conversation template override
    #[arg(long)]
    pub conv_mode: Option<String>,

    /// Frames sampled per clip
    #[arg(long)]
    pub num_frames: Option<usize>,

    /// Concurrent inference workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Shard index for launcher-driven multi-process runs
    /// (defaults to the RANK environment variable)
    #[arg(long)]
    pub rank: Option<usize>,

    /// Total process count for multi-process runs
    /// (defaults to the WORLD_SIZE environment variable)
    #[arg(long)]
    pub world_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct JudgeArgs {
    /// Judge rubric: recognition or forecasting
    #[arg(long)]
    pub task: String,

    /// Path to the inference results JSON
    #[arg(long)]
    pub json_path: PathBuf,

    /// Judge model override
    #[arg(long)]
    pub model: Option<String>,

    /// Fallback model used after a rejected request
    #[arg(long)]
    pub fallback_model: Option<String>,

    /// API key (overrides the configured environment variable)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Write per-id scores to this JSON file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Path to the QA manifest JSON (array of objects with an "id" field)
    #[arg(long)]
    pub manifest: PathBuf,

    /// Directory containing video files
    #[arg(long)]
    pub video_dir: PathBuf,

    /// Video extensions to include
    #[arg(long, num_args = 1.., default_values_t = vec![".mp4".to_string()])]
    pub exts: Vec<String>,

    /// Save report .txt files to this directory
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Case-insensitive ID comparison
    #[arg(long)]
    pub case_insensitive: bool,
}

#[derive(Args, Debug)]
pub struct MergeShardsArgs {
    /// Directory holding the per-rank files
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Base name used when the shards were written
    #[arg(long)]
    pub output_name: String,

    /// Number of ranks that wrote shards
    #[arg(long)]
    pub world_size: usize,
}

/// Results-file path for a rank. Single-process runs write `<name>.json`;
/// sharded runs write `<name>.rank<r>.json`.
fn results_path(output_dir: &Path, output_name: &str, world: WorldInfo) -> PathBuf {
    let base = output_name.strip_suffix(".json").unwrap_or(output_name);
    let file = if world.world_size > 1 {
        format!("{base}.rank{}.json", world.rank)
    } else {
        format!("{base}.json")
    };
    output_dir.join(file)
}

pub async fn run_infer(args: InferArgs, mut config: InferConfig) -> anyhow::Result<()> {
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(conv_mode) = args.conv_mode {
        config.conv_mode = conv_mode;
    }
    if let Some(num_frames) = args.num_frames {
        config.num_frames = num_frames;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let task: TaskKind = args.task.parse().map_err(anyhow::Error::msg)?;
    if !args.video_dir.is_dir() {
        bail!("video directory not found: {}", args.video_dir.display());
    }

    let manifest = Manifest::load(&args.qa_file, task)
        .with_context(|| format!("loading manifest {}", args.qa_file.display()))?;
    let total = manifest.attempted();

    let world = match (args.rank, args.world_size) {
        (Some(rank), Some(world_size)) => {
            if world_size == 0 || rank >= world_size {
                bail!("invalid rank {rank} for world size {world_size}");
            }
            WorldInfo::new(rank, world_size)
        }
        _ => WorldInfo::from_env(),
    };
    let manifest = shard_manifest(manifest, world);
    info!(
        rank = world.rank,
        world_size = world.world_size,
        shard = manifest.attempted(),
        total,
        "starting inference"
    );

    let frames = Arc::new(FfmpegFrameSource::new(config.num_frames));
    let model = Arc::new(OpenAiCompatibleVlm::new(&config)?);
    let ctx = EvalContext {
        video_dir: args.video_dir.clone(),
    };

    let outcomes = eval::run_inference(manifest, ctx, frames, model, config.workers).await;
    let (records, skips) = split_outcomes(outcomes);

    // Exact-match accuracy only makes sense for multiple-choice forecasting.
    // Comparison is plain string equality, so a choice echoed with extra
    // punctuation does not count.
    if task == TaskKind::Forecasting && !records.is_empty() {
        let exact = records
            .iter()
            .filter(|r| r.prediction == r.ground_truth)
            .count();
        info!(
            exact,
            recorded = records.len(),
            "exact-match choices (string equality)"
        );
    }

    let path = results_path(&args.output_dir, &args.output_name, world);
    write_json_pretty(&path, &records)?;

    println!("Attempted: {}", records.len() + skips.len());
    println!("Recorded:  {}", records.len());
    println!("Skipped:   {}", skips.len());
    for (kind, count) in skip_summary(&skips) {
        println!("  {kind}: {count}");
    }
    for (video_id, reason) in &skips {
        println!("  {video_id}: {reason}");
    }
    println!("Results written to {}", path.display());
    if world.world_size > 1 {
        println!(
            "Run `videval merge-shards --output-dir {} --output-name {} --world-size {}` once all ranks finish.",
            args.output_dir.display(),
            args.output_name,
            world.world_size
        );
    }
    Ok(())
}

pub async fn run_judge(args: JudgeArgs, mut config: JudgeConfig) -> anyhow::Result<()> {
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(fallback_model) = args.fallback_model {
        config.fallback_model = fallback_model;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key;
    }
    let variant: JudgeVariant = args.task.parse().map_err(anyhow::Error::msg)?;

    let text = std::fs::read_to_string(&args.json_path)
        .with_context(|| format!("reading {}", args.json_path.display()))?;
    let records: Vec<PredictionRecord> =
        serde_json::from_str(&text).context("parsing inference results")?;
    info!(predictions = records.len(), "starting judge run");

    let client = JudgeClient::new(config, variant)?;
    let results: BTreeMap<String, JudgeRecord> = client.judge_predictions(&records).await;

    for (video_id, record) in &results {
        println!("{video_id} {} {}", record.score, record.label);
    }
    match accuracy(&results) {
        Some(acc) => println!("Accuracy: {acc}"),
        None => println!("No results were processed successfully."),
    }

    if let Some(output) = args.output {
        write_json_pretty(&output, &results)?;
        println!("Scores written to {}", output.display());
    }
    Ok(())
}

pub fn run_reconcile(args: ReconcileArgs) -> anyhow::Result<()> {
    let manifest_ids = reconcile::load_manifest_ids(&args.manifest)
        .with_context(|| format!("reading {}", args.manifest.display()))?;
    let video_ids = reconcile::load_video_ids(&args.video_dir, &args.exts)?;
    let report = reconcile::reconcile(&manifest_ids, &video_ids, args.case_insensitive);

    println!("=== ID Consistency Check ===");
    println!("Manifest:    {}", args.manifest.display());
    println!("Video dir:   {}", args.video_dir.display());
    println!("Extensions:  {}", args.exts.join(", "));
    println!("Case-insensitive: {}", args.case_insensitive);
    println!("\n--- Counts ---");
    println!(
        "Total manifest IDs:      {} (raw {})",
        report.manifest_unique(),
        report.manifest_ids_raw
    );
    println!(
        "Total video IDs:         {} (raw {})",
        report.videos_unique(),
        report.video_ids_raw
    );
    println!("Present in both:         {}", report.intersection.len());
    println!(
        "In manifest only (missing videos): {}",
        report.only_in_manifest.len()
    );
    println!(
        "In videos only (missing in manifest): {}",
        report.only_in_videos.len()
    );

    preview("IDs in manifest but not in videos", &report.only_in_manifest);
    preview("IDs in videos but not in manifest", &report.only_in_videos);

    if let Some(save_dir) = args.save_dir {
        let written = reconcile::write_report(&save_dir, &report)?;
        println!("\nReports saved to:");
        for path in written {
            println!("- {}", path.display());
        }
    }
    Ok(())
}

fn preview(name: &str, items: &[String]) {
    const LIMIT: usize = 20;
    println!("\n--- {name} (showing up to {LIMIT}) ---");
    for item in items.iter().take(LIMIT) {
        println!("{item}");
    }
    if items.len() > LIMIT {
        println!("... (+{} more)", items.len() - LIMIT);
    }
}

pub fn run_merge_shards(args: MergeShardsArgs) -> anyhow::Result<()> {
    // A world size of 1 never writes rank files: the run produced
    // `<name>.json` directly and there is nothing to merge.
    if args.world_size < 2 {
        bail!(
            "world size must be at least 2; a single-process run already writes {}",
            results_path(&args.output_dir, &args.output_name, WorldInfo::SINGLE).display()
        );
    }

    let mut merged: Vec<PredictionRecord> = Vec::new();
    for rank in 0..args.world_size {
        let world = WorldInfo::new(rank, args.world_size);
        let path = results_path(&args.output_dir, &args.output_name, world);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading shard {}", path.display()))?;
        let records: Vec<PredictionRecord> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        info!(rank, records = records.len(), "merged shard");
        merged.extend(records);
    }

    let out = results_path(&args.output_dir, &args.output_name, WorldInfo::SINGLE);
    write_json_pretty(&out, &merged)?;
    println!(
        "Merged {} records from {} shards into {}",
        merged.len(),
        args.world_size,
        out.display()
    );
    Ok(())
}

fn skip_summary(skips: &[(String, SkipReason)]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for (_, reason) in skips {
        let key = match reason {
            SkipReason::MissingVideo(_) => "missing_video",
            SkipReason::DecodeFailed(_) => "decode_failed",
            SkipReason::MalformedSample(_) => "malformed_sample",
            SkipReason::ModelFailed(_) => "model_failed",
        };
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_path_for_single_and_sharded_runs() {
        let dir = Path::new("/tmp/out");
        assert_eq!(
            results_path(dir, "charades", WorldInfo::SINGLE),
            dir.join("charades.json")
        );
        assert_eq!(
            results_path(dir, "charades.json", WorldInfo::SINGLE),
            dir.join("charades.json")
        );
        assert_eq!(
            results_path(dir, "charades", WorldInfo::new(2, 4)),
            dir.join("charades.rank2.json")
        );
    }

    #[test]
    fn merge_reads_ranks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let record = |id: &str| PredictionRecord {
            video_id: id.to_string(),
            question: "q".into(),
            ground_truth: "gt".into(),
            prediction: "p".into(),
        };
        for (rank, ids) in [(0usize, vec!["A", "C"]), (1, vec!["B"])] {
            let path = results_path(dir.path(), "out", WorldInfo::new(rank, 2));
            let records: Vec<PredictionRecord> =
                ids.into_iter().map(record).collect();
            write_json_pretty(&path, &records).unwrap();
        }

        run_merge_shards(MergeShardsArgs {
            output_dir: dir.path().to_path_buf(),
            output_name: "out".to_string(),
            world_size: 2,
        })
        .unwrap();

        let merged: Vec<PredictionRecord> = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("out.json")).unwrap(),
        )
        .unwrap();
        let ids: Vec<_> = merged.iter().map(|r| r.video_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
    }

    #[test]
    fn merge_rejects_single_process_world() {
        let err = run_merge_shards(MergeShardsArgs {
            output_dir: PathBuf::from("/tmp/out"),
            output_name: "out".to_string(),
            world_size: 1,
        })
        .unwrap_err();
        assert!(err.to_string().contains("at least 2"));
    }

    #[test]
    fn skip_summary_counts_by_reason() {
        let skips = vec![
            ("A".to_string(), SkipReason::MissingVideo("/x".into())),
            ("B".to_string(), SkipReason::MissingVideo("/y".into())),
            ("C".to_string(), SkipReason::ModelFailed("down".into())),
        ];
        let counts = skip_summary(&skips);
        assert_eq!(counts["missing_video"], 2);
        assert_eq!(counts["model_failed"], 1);
    }
}
