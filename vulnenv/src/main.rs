//! `vulnenv` command line: inspect a function or play one episode against it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use vulnenv::core::analyzer::Analyzer;
use vulnenv::core::patterns;
use vulnenv::core::source::SourceFunction;
use vulnenv::core::types::{AnalysisState, PatternKind, TriState};
use vulnenv::episode::Episode;
use vulnenv::exit_codes;
use vulnenv::io::config::{CONFIG_FILE, EnvConfig, load_config, write_config};
use vulnenv::io::policy::CommandPolicy;
use vulnenv::io::trajectory_log::{LogFormat, TrajectoryLogger};
use vulnenv::logging;
use vulnenv::rollout::run_episode;

#[derive(Parser)]
#[command(
    name = "vulnenv",
    version,
    about = "Step-wise heuristic vulnerability analysis environment"
)]
struct Cli {
    /// Config file (defaults apply when missing).
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print every fact and detector verdict for a C/C++ function as JSON.
    Analyze {
        /// File holding one function.
        file: PathBuf,
    },
    /// Run one episode with the configured policy command.
    Play {
        file: PathBuf,
        /// Ground-truth label: 1 vulnerable, 0 safe.
        #[arg(long)]
        label: u8,
        /// Directory for the trajectory.
        #[arg(long, default_value = "trajectories")]
        out: PathBuf,
        /// Append to `trajectories.jsonl` instead of writing `episode_<id>.json`.
        #[arg(long)]
        jsonl: bool,
        /// Episode id; defaults to the file stem.
        #[arg(long)]
        id: Option<String>,
    },
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
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Analyze { file } => cmd_analyze(&file),
        Command::Play {
            file,
            label,
            out,
            jsonl,
            id,
        } => cmd_play(&cli.config, &file, label, &out, jsonl, id),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &EnvConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(())
}

#[derive(Debug, Serialize)]
struct PatternVerdict {
    pattern: PatternKind,
    result: TriState,
}

#[derive(Debug, Serialize)]
struct AnalysisReport {
    facts: AnalysisState,
    patterns: Vec<PatternVerdict>,
}

/// Gather every fact, then run each detector with its prerequisite in hand.
fn analyze_source(source: &SourceFunction) -> AnalysisReport {
    let analyzer = Analyzer::new(source);
    let mut facts = AnalysisState {
        summary: Some(analyzer.summarize_code()),
        variables: Some(analyzer.list_variables()),
        functions: Some(analyzer.list_functions()),
        dataflows: Some(analyzer.list_dataflows()),
        freed_variables: Some(analyzer.list_freed_variables()),
        null_assigned_variables: Some(analyzer.list_null_assigned_variables()),
        suspected_line: Some(analyzer.identify_vulnerable_line()),
        ..AnalysisState::default()
    };
    let verdicts = [
        (
            PatternKind::BufferOverflow,
            patterns::buffer_overflow(source, facts.functions.as_ref()),
        ),
        (
            PatternKind::NullDeref,
            patterns::null_deref(source, facts.null_assigned_variables.as_deref()),
        ),
        (
            PatternKind::UseAfterFree,
            patterns::use_after_free(source, facts.freed_variables.as_deref()),
        ),
    ];
    let mut report = Vec::with_capacity(verdicts.len());
    for (pattern, result) in verdicts {
        facts.pattern_results.set(pattern, result);
        report.push(PatternVerdict { pattern, result });
    }
    AnalysisReport {
        facts,
        patterns: report,
    }
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("read {}", file.display()))
}

fn cmd_analyze(file: &Path) -> Result<()> {
    let source = SourceFunction::new(read_source(file)?);
    let report = analyze_source(&source);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize analysis")?
    );
    Ok(())
}

fn cmd_play(
    config_path: &Path,
    file: &Path,
    label: u8,
    out: &Path,
    jsonl: bool,
    id: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let policy = CommandPolicy::from_config(&config)?;
    let mut episode = Episode::new(read_source(file)?, label, config.episode_config())?;
    let episode_id = id.unwrap_or_else(|| {
        file.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "episode".to_string())
    });
    let format = if jsonl {
        LogFormat::Jsonl
    } else {
        LogFormat::PerEpisode
    };
    let logger = TrajectoryLogger::new(out, format)?;

    let trajectory = run_episode(&episode_id, &mut episode, &policy, |step| {
        info!(t = step.t, action = %step.action, reward = step.reward, "step");
    })?;
    let path = logger.write(&trajectory)?;

    println!(
        "{}",
        serde_json::json!({
            "episode_id": trajectory.episode_id,
            "reward": trajectory.final_reward,
            "steps": trajectory.step_count,
            "termination": trajectory.termination,
            "trajectory": path,
        })
    );
    Ok(())
}
