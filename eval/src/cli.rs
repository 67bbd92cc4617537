//! CLI command implementations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use vulnenv::io::config::{EnvConfig, load_config};
use vulnenv::io::dataset::{DatasetStats, Split, load_dataset};
use vulnenv::io::policy::CommandPolicy;

use crate::config::{RunOverrides, apply_overrides};
use crate::report::aggregate;
use crate::run::{RunOptions, run_eval};

/// Load the environment config and play the selected samples.
pub fn run(config_path: &Path, options: &RunOptions, overrides: &RunOverrides) -> Result<()> {
    let base = load_config(config_path).context("load environment config")?;
    let config: EnvConfig = apply_overrides(base, overrides)?;
    debug!(?config, "effective config");
    let policy = CommandPolicy::from_config(&config)?;

    let outcome = run_eval(options, &config, &policy).context("run eval")?;
    let correct = outcome
        .results
        .iter()
        .filter(|r| r.outcome == crate::outcome::Outcome::Correct)
        .count();
    println!(
        "run: eval_run_id={} episodes={} correct={} results={}",
        outcome.eval_run_id,
        outcome.results.len(),
        correct,
        outcome.results_dir.display()
    );
    Ok(())
}

/// Show aggregated results for a results directory.
pub fn report(results_dir: &Path) -> Result<()> {
    let (summary, warnings) = aggregate(results_dir)?;
    println!(
        "report: runs={} episodes={}",
        summary.runs, summary.episodes
    );
    println!(
        "report: correct={} incorrect={} error={}",
        summary.correct, summary.incorrect, summary.error
    );
    if let Some(rate) = summary.success_rate() {
        println!("report: success_rate={rate:.3}");
    }
    if let Some(avg) = summary.avg_steps() {
        println!("report: avg_steps={avg:.2}");
    }
    println!(
        "report: labels vulnerable={} safe={} truncated={}",
        summary.vulnerable, summary.safe, summary.truncated
    );
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove a results directory.
pub fn clean(results_dir: &Path) -> Result<()> {
    if results_dir.exists() {
        fs::remove_dir_all(results_dir)
            .with_context(|| format!("remove {}", results_dir.display()))?;
    }
    println!("clean: results={}", results_dir.display());
    Ok(())
}

/// Label counts for every split of a dataset directory.
pub fn split_stats(dataset_dir: &Path) -> Result<Vec<(Split, DatasetStats)>> {
    let dataset = load_dataset(dataset_dir)
        .with_context(|| format!("load dataset {}", dataset_dir.display()))?;
    Ok(Split::ALL
        .into_iter()
        .map(|split| (split, DatasetStats::of(dataset.split(split))))
        .collect())
}

/// Print label counts for every split.
pub fn stats(dataset_dir: &Path) -> Result<()> {
    for (split, stats) in split_stats(dataset_dir)? {
        println!(
            "stats: split={split} total={} vulnerable={} safe={}",
            stats.total, stats.vulnerable, stats.safe
        );
    }
    Ok(())
}
