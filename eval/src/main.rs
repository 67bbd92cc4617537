mod cli;
mod config;
mod outcome;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use vulnenv::io::config::CONFIG_FILE;
use vulnenv::io::dataset::Split;
use vulnenv::io::trajectory_log::LogFormat;
use vulnenv::{exit_codes, logging};

use crate::config::RunOverrides;
use crate::run::RunOptions;

const DEFAULT_RESULTS_DIR: &str = "eval/results";

#[derive(Parser)]
#[command(name = "eval", version, about = "Batch evaluation for vulnenv policies")]
struct Cli {
    /// Environment config file (defaults apply when missing).
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play one episode per selected sample.
    Run(RunArgs),
    /// Aggregate `results.jsonl` across runs.
    Report {
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results: PathBuf,
    },
    /// Label counts for each split of a dataset.
    Stats {
        #[arg(long)]
        dataset: PathBuf,
    },
    /// Delete a results directory.
    Clean {
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding `train.jsonl`, `valid.jsonl` and `test.jsonl`.
    #[arg(long)]
    dataset: PathBuf,
    #[arg(long, default_value = "test")]
    split: Split,
    /// Play at most this many episodes.
    #[arg(long)]
    episodes: Option<usize>,
    #[arg(long)]
    only_vulnerable: bool,
    #[arg(long)]
    shuffle: bool,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Worker threads (defaults to one per core).
    #[arg(long)]
    jobs: Option<usize>,
    /// Append trajectories to one JSONL file instead of one file per episode.
    #[arg(long)]
    jsonl: bool,
    #[arg(long)]
    max_steps: Option<u32>,
    /// Reject unrecognized actions instead of spending a turn on them.
    #[arg(long)]
    strict: bool,
    #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
    out: PathBuf,
}

impl RunArgs {
    fn into_parts(self) -> (RunOptions, RunOverrides) {
        let trajectory_format = if self.jsonl {
            LogFormat::Jsonl
        } else {
            LogFormat::PerEpisode
        };
        let options = RunOptions {
            dataset: self.dataset,
            split: self.split,
            episodes: self.episodes,
            only_vulnerable: self.only_vulnerable,
            shuffle: self.shuffle,
            seed: self.seed,
            jobs: self.jobs,
            trajectory_format,
            out: self.out,
        };
        let overrides = RunOverrides {
            max_steps: self.max_steps,
            strict: self.strict,
        };
        (options, overrides)
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            let (options, overrides) = args.into_parts();
            cli::run(&cli.config, &options, &overrides)
        }
        Command::Report { results } => cli::report(&results),
        Command::Stats { dataset } => cli::stats(&dataset),
        Command::Clean { results } => cli::clean(&results),
    }
}
