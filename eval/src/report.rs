use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use vulnenv::episode::LABEL_VULNERABLE;

use crate::outcome::Outcome;
use crate::results::{META_FILE, RESULTS_FILE, read_meta, read_results};

#[derive(Debug, Default, PartialEq)]
pub struct ReportSummary {
    pub runs: usize,
    pub episodes: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub error: usize,
    pub vulnerable: usize,
    pub safe: usize,
    /// Episodes ended by the step budget rather than a verdict.
    pub truncated: usize,
    pub total_steps: u64,
}

impl ReportSummary {
    /// Correct over all episodes, errors included.
    pub fn success_rate(&self) -> Option<f64> {
        (self.episodes > 0).then(|| self.correct as f64 / self.episodes as f64)
    }

    /// Mean steps over played (non-error) episodes.
    pub fn avg_steps(&self) -> Option<f64> {
        let played = self.correct + self.incorrect;
        (played > 0).then(|| self.total_steps as f64 / played as f64)
    }
}

/// Run directories under `results_dir`, or `results_dir` itself when it is one.
pub fn load_run_dirs(results_dir: &Path) -> Result<Vec<PathBuf>> {
    if results_dir.join(RESULTS_FILE).exists() {
        return Ok(vec![results_dir.to_path_buf()]);
    }
    if !results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in
        fs::read_dir(results_dir).with_context(|| format!("read {}", results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();

    for run_dir in load_run_dirs(results_dir)? {
        let results_path = run_dir.join(RESULTS_FILE);
        if !results_path.exists() {
            warnings.push(format!("skip {}: no {RESULTS_FILE}", run_dir.display()));
            continue;
        }
        if let Err(err) = read_meta(&run_dir.join(META_FILE)) {
            warnings.push(format!("{}: {META_FILE} invalid ({err:#})", run_dir.display()));
        }
        let (rows, row_warnings) = read_results(&results_path)?;
        warnings.extend(row_warnings);

        summary.runs += 1;
        for row in rows {
            summary.episodes += 1;
            match row.outcome {
                Outcome::Correct => summary.correct += 1,
                Outcome::Incorrect => summary.incorrect += 1,
                Outcome::Error => summary.error += 1,
            }
            if row.label == LABEL_VULNERABLE {
                summary.vulnerable += 1;
            } else {
                summary.safe += 1;
            }
            if row.truncated {
                summary.truncated += 1;
            }
            if row.outcome != Outcome::Error {
                summary.total_steps += u64::from(row.steps);
            }
        }
    }

    Ok((summary, warnings))
}
