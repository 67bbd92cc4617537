//! Result persistence for one eval run.
//!
//! Layout under `<out>/<eval_run_id>/`:
//! - `meta.json`: what was run, on which data, with which config, and when.
//! - `results.jsonl`: one [`EpisodeResult`] per line, in sample order.
//! - `trajectories/`: full trajectories written by the environment logger.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use vulnenv::episode::Termination;
use vulnenv::io::config::EnvConfig;
use vulnenv::io::trajectory_log::LogFormat;

use crate::outcome::Outcome;

pub const META_FILE: &str = "meta.json";
pub const RESULTS_FILE: &str = "results.jsonl";
pub const TRAJECTORIES_DIR: &str = "trajectories";

/// Per-episode row of `results.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeResult {
    pub episode_id: String,
    /// Index of the sample within its split.
    pub sample_index: usize,
    pub label: u8,
    pub outcome: Outcome,
    pub reward: Option<u8>,
    pub steps: u32,
    pub truncated: bool,
    pub termination: Option<Termination>,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub eval_run_id: String,
    pub dataset: String,
    pub split: String,
    /// SHA-256 of the split file, for reproducibility tracking.
    pub dataset_hash: String,
    pub episodes: usize,
    pub only_vulnerable: bool,
    pub shuffle: bool,
    pub seed: u64,
    pub jobs: usize,
    pub trajectory_format: LogFormat,
    pub config: EnvConfig,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
}

impl EvalMeta {
    pub fn set_times(&mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) {
        self.start_time = started_at.to_rfc3339();
        self.end_time = finished_at.to_rfc3339();
        self.duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
    }
}

pub fn run_dir(base_dir: &Path, eval_run_id: &str) -> PathBuf {
    base_dir.join(eval_run_id)
}

pub fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

pub fn read_meta(path: &Path) -> Result<EvalMeta> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn write_results(path: &Path, results: &[EpisodeResult]) -> Result<()> {
    let mut buf = String::new();
    for result in results {
        buf.push_str(&serde_json::to_string(result).context("serialize episode result")?);
        buf.push('\n');
    }
    fs::write(path, buf).with_context(|| format!("write results {}", path.display()))?;
    debug!(rows = results.len(), path = %path.display(), "results written");
    Ok(())
}

/// Read `results.jsonl`; malformed lines become warnings instead of errors.
pub fn read_results(path: &Path) -> Result<(Vec<EpisodeResult>, Vec<String>)> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut results = Vec::new();
    let mut warnings = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(result) => results.push(result),
            Err(err) => warnings.push(format!(
                "skip {} line {}: {err}",
                path.display(),
                index + 1
            )),
        }
    }
    Ok((results, warnings))
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn result(id: &str, outcome: Outcome) -> EpisodeResult {
        EpisodeResult {
            episode_id: id.to_string(),
            sample_index: 0,
            label: 1,
            outcome,
            reward: Some(u8::from(outcome == Outcome::Correct)),
            steps: 3,
            truncated: false,
            termination: Some(Termination::NegativeAlarm),
            elapsed_secs: 0.5,
            error: None,
        }
    }

    #[test]
    fn run_dir_is_stable() {
        let dir = run_dir(Path::new("/tmp/results"), "eval-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/eval-1"));
    }

    #[test]
    fn results_round_trip_and_skip_bad_lines() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(RESULTS_FILE);
        write_results(&path, &[result("a", Outcome::Correct), result("b", Outcome::Incorrect)])
            .expect("write");
        let mut contents = fs::read_to_string(&path).expect("read");
        contents.push_str("{not json}\n");
        fs::write(&path, contents).expect("append garbage");

        let (rows, warnings) = read_results(&path).expect("read results");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].outcome, Outcome::Incorrect);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("line 3"));
    }

    #[test]
    fn sha256_matches_known_digest() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("test.jsonl");
        fs::write(&path, "abc").expect("write");
        assert_eq!(
            file_sha256(&path).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn meta_times_are_rfc3339_with_duration() {
        let started = Utc::now();
        let finished = started + chrono::Duration::milliseconds(1500);
        let mut meta = EvalMeta {
            eval_run_id: "eval-1".to_string(),
            dataset: "data".to_string(),
            split: "test".to_string(),
            dataset_hash: String::new(),
            episodes: 0,
            only_vulnerable: false,
            shuffle: false,
            seed: 0,
            jobs: 1,
            trajectory_format: LogFormat::Jsonl,
            config: EnvConfig::default(),
            start_time: String::new(),
            end_time: String::new(),
            duration_secs: 0.0,
        };
        meta.set_times(started, finished);
        assert_eq!(meta.duration_secs, 1.5);
        assert!(DateTime::parse_from_rfc3339(&meta.end_time).is_ok());

        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(META_FILE);
        write_meta(&path, &meta).expect("write meta");
        assert_eq!(read_meta(&path).expect("read meta").config, EnvConfig::default());
    }
}
