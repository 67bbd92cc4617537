//! Batch episode execution.
//!
//! Selects samples from a dataset split, plays one independent episode per
//! sample on a rayon pool, and persists trajectories, results and metadata.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, distributions::Alphanumeric};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use vulnenv::episode::{Episode, LABEL_VULNERABLE};
use vulnenv::io::config::EnvConfig;
use vulnenv::io::dataset::{DatasetStats, Sample, Split, load_split};
use vulnenv::io::policy::Policy;
use vulnenv::io::trajectory_log::{LogFormat, TrajectoryLogger};
use vulnenv::rollout::run_episode;

use crate::outcome::{Outcome, classify_outcome, is_truncated};
use crate::results::{
    EpisodeResult, EvalMeta, META_FILE, RESULTS_FILE, TRAJECTORIES_DIR, file_sha256, run_dir,
    write_meta, write_results,
};

/// What to run, independent of how the environment is configured.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dataset: PathBuf,
    pub split: Split,
    /// Cap on episodes; `None` plays every selected sample.
    pub episodes: Option<usize>,
    pub only_vulnerable: bool,
    pub shuffle: bool,
    pub seed: u64,
    /// Worker threads; `None` uses rayon's default.
    pub jobs: Option<usize>,
    pub trajectory_format: LogFormat,
    pub out: PathBuf,
}

/// Result of one `eval run`.
#[derive(Debug)]
pub struct RunOutcome {
    pub eval_run_id: String,
    pub results_dir: PathBuf,
    pub results: Vec<EpisodeResult>,
}

/// Pick `(index_in_split, sample)` pairs per the filtering and ordering options.
pub fn select_samples<'a>(samples: &'a [Sample], options: &RunOptions) -> Vec<(usize, &'a Sample)> {
    let mut selected: Vec<(usize, &Sample)> = samples
        .iter()
        .enumerate()
        .filter(|(_, sample)| !options.only_vulnerable || sample.label == LABEL_VULNERABLE)
        .collect();
    if options.shuffle {
        let mut rng = StdRng::seed_from_u64(options.seed);
        selected.shuffle(&mut rng);
    }
    if let Some(limit) = options.episodes {
        selected.truncate(limit);
    }
    selected
}

/// Play every selected sample and write the run directory.
#[instrument(skip_all, fields(split = %options.split))]
pub fn run_eval<P: Policy>(
    options: &RunOptions,
    config: &EnvConfig,
    policy: &P,
) -> Result<RunOutcome> {
    let split_path = options.dataset.join(options.split.file_name());
    let samples = load_split(&split_path)?;
    let selected = select_samples(&samples, options);
    let available = DatasetStats::of(&samples);
    let picked = DatasetStats::of(selected.iter().map(|(_, sample)| *sample));
    info!(
        available = available.total,
        available_vulnerable = available.vulnerable,
        available_safe = available.safe,
        selected = picked.total,
        selected_vulnerable = picked.vulnerable,
        selected_safe = picked.safe,
        "samples selected"
    );

    let started_at = Utc::now();
    let eval_run_id = generate_run_id();
    let results_dir = run_dir(&options.out, &eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;
    let logger = TrajectoryLogger::new(results_dir.join(TRAJECTORIES_DIR), options.trajectory_format)?;

    let pool = build_pool(options.jobs)?;
    let results: Vec<EpisodeResult> = pool.install(|| {
        selected
            .par_iter()
            .map(|(index, sample)| {
                let episode_id = format!("{}-{}", options.split, index);
                play_sample(&episode_id, *index, sample, config, policy, &logger)
            })
            .collect()
    });

    write_results(&results_dir.join(RESULTS_FILE), &results)?;

    let finished_at = Utc::now();
    let mut meta = EvalMeta {
        eval_run_id: eval_run_id.clone(),
        dataset: options.dataset.display().to_string(),
        split: options.split.to_string(),
        dataset_hash: file_sha256(&split_path)?,
        episodes: results.len(),
        only_vulnerable: options.only_vulnerable,
        shuffle: options.shuffle,
        seed: options.seed,
        jobs: pool.current_num_threads(),
        trajectory_format: options.trajectory_format,
        config: config.clone(),
        start_time: String::new(),
        end_time: String::new(),
        duration_secs: 0.0,
    };
    meta.set_times(started_at, finished_at);
    write_meta(&results_dir.join(META_FILE), &meta)?;

    info!(
        episodes = results.len(),
        duration_secs = meta.duration_secs,
        results_dir = %results_dir.display(),
        "eval run complete"
    );
    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        results,
    })
}

/// Play one sample. Failures are recorded in the row, not propagated, so one
/// bad episode does not lose the rest of the run.
fn play_sample<P: Policy>(
    episode_id: &str,
    sample_index: usize,
    sample: &Sample,
    config: &EnvConfig,
    policy: &P,
    logger: &TrajectoryLogger,
) -> EpisodeResult {
    let played = Episode::new(sample.code.as_str(), sample.label, config.episode_config())
        .map_err(anyhow::Error::from)
        .and_then(|mut episode| run_episode(episode_id, &mut episode, policy, |_| {}))
        .and_then(|trajectory| logger.write(&trajectory).map(|_| trajectory));

    match played {
        Ok(trajectory) => {
            debug!(episode_id, reward = trajectory.final_reward, "episode logged");
            EpisodeResult {
                episode_id: episode_id.to_string(),
                sample_index,
                label: sample.label,
                outcome: classify_outcome(Some(trajectory.final_reward)),
                reward: Some(trajectory.final_reward),
                steps: trajectory.step_count,
                truncated: is_truncated(Some(&trajectory.termination)),
                termination: Some(trajectory.termination),
                elapsed_secs: trajectory.elapsed_secs,
                error: None,
            }
        }
        Err(err) => {
            warn!(episode_id, err = %format!("{err:#}"), "episode failed");
            EpisodeResult {
                episode_id: episode_id.to_string(),
                sample_index,
                label: sample.label,
                outcome: Outcome::Error,
                reward: None,
                steps: 0,
                truncated: false,
                termination: None,
                elapsed_secs: 0.0,
                error: Some(format!("{err:#}")),
            }
        }
    }
}

fn build_pool(jobs: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = jobs {
        builder = builder.num_threads(jobs);
    }
    builder.build().context("build worker pool")
}

fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let short_id: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("eval-{timestamp}-{short_id}")
}
