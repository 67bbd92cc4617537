//! Trajectory persistence.
//!
//! Two layouts:
//! - `PerEpisode`: `<dir>/episode_<id>.json`, one pretty-printed trajectory per file.
//! - `Jsonl`: `<dir>/trajectories.jsonl`, one compact trajectory per line, appended.
//!
//! Every step is checked against `schemas/trajectory_step.schema.json` before
//! anything is written, so a malformed record never reaches disk.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::rollout::EpisodeTrajectory;

const STEP_SCHEMA: &str = include_str!("../../schemas/trajectory_step.schema.json");
pub const JSONL_FILE: &str = "trajectories.jsonl";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    PerEpisode,
    Jsonl,
}

pub struct TrajectoryLogger {
    dir: PathBuf,
    format: LogFormat,
    validator: Validator,
    append_lock: Mutex<()>,
}

impl TrajectoryLogger {
    pub fn new(dir: impl Into<PathBuf>, format: LogFormat) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create trajectory dir {}", dir.display()))?;
        let schema: Value =
            serde_json::from_str(STEP_SCHEMA).context("parse trajectory step schema")?;
        let validator =
            validator_for(&schema).map_err(|err| anyhow!("invalid trajectory schema: {err}"))?;
        Ok(Self {
            dir,
            format,
            validator,
            append_lock: Mutex::new(()),
        })
    }

    /// Validate and persist one trajectory; returns the file written to.
    pub fn write(&self, trajectory: &EpisodeTrajectory) -> Result<PathBuf> {
        self.validate(trajectory)?;
        let path = match self.format {
            LogFormat::PerEpisode => {
                let path = self.dir.join(episode_file_name(&trajectory.episode_id));
                let mut buf = serde_json::to_string_pretty(trajectory)?;
                buf.push('\n');
                fs::write(&path, buf)
                    .with_context(|| format!("write trajectory {}", path.display()))?;
                path
            }
            LogFormat::Jsonl => {
                let path = self.dir.join(JSONL_FILE);
                let mut line = serde_json::to_string(trajectory)?;
                line.push('\n');
                let _guard = self
                    .append_lock
                    .lock()
                    .map_err(|_| anyhow!("trajectory log lock poisoned"))?;
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("open {}", path.display()))?;
                file.write_all(line.as_bytes())
                    .with_context(|| format!("append {}", path.display()))?;
                path
            }
        };
        debug!(episode_id = %trajectory.episode_id, path = %path.display(), "trajectory written");
        Ok(path)
    }

    fn validate(&self, trajectory: &EpisodeTrajectory) -> Result<()> {
        for step in &trajectory.steps {
            let value = serde_json::to_value(step)?;
            let messages: Vec<String> = self
                .validator
                .iter_errors(&value)
                .map(|err| err.to_string())
                .collect();
            if !messages.is_empty() {
                bail!(
                    "episode {} step {} failed schema validation:\n- {}",
                    trajectory.episode_id,
                    step.t,
                    messages.join("\n- ")
                );
            }
        }
        Ok(())
    }
}

/// `episode_<id>.json`, with path separators in the id replaced.
pub fn episode_file_name(episode_id: &str) -> String {
    let safe: String = episode_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("episode_{safe}.json")
}

/// Read every trajectory from a `trajectories.jsonl` file.
pub fn read_jsonl(path: &Path) -> Result<Vec<EpisodeTrajectory>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), index + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{Episode, EpisodeConfig, LABEL_VULNERABLE, Termination};
    use crate::rollout::run_episode;
    use crate::test_support::{ScriptedPolicy, UAF_FUNCTION};

    fn trajectory(id: &str) -> EpisodeTrajectory {
        let mut episode =
            Episode::new(UAF_FUNCTION, LABEL_VULNERABLE, EpisodeConfig::default()).expect("ep");
        let policy = ScriptedPolicy::new(["list_freed_variables()", "bogus", "positive_alarm(4)"]);
        run_episode(id, &mut episode, &policy, |_| {}).expect("run")
    }

    #[test]
    fn per_episode_files_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = TrajectoryLogger::new(temp.path(), LogFormat::PerEpisode).expect("logger");
        let original = trajectory("train/7");

        let path = logger.write(&original).expect("write");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("episode_train_7.json"));
        let loaded: EpisodeTrajectory =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(loaded.steps, original.steps);
        assert_eq!(loaded.termination, Termination::PositiveAlarm { line: Some(4) });
    }

    #[test]
    fn jsonl_appends_one_line_per_episode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = TrajectoryLogger::new(temp.path(), LogFormat::Jsonl).expect("logger");
        logger.write(&trajectory("a")).expect("write a");
        logger.write(&trajectory("b")).expect("write b");

        let loaded = read_jsonl(&temp.path().join(JSONL_FILE)).expect("read");
        let ids: Vec<&str> = loaded.iter().map(|t| t.episode_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn every_step_matches_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = TrajectoryLogger::new(temp.path(), LogFormat::PerEpisode).expect("logger");
        let original = trajectory("schema");
        assert!(logger.validate(&original).is_ok());
        assert!(original.steps.iter().any(|s| s.observation.history.len() == 1));
    }

    #[test]
    fn rejects_step_outside_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = TrajectoryLogger::new(temp.path(), LogFormat::PerEpisode).expect("logger");
        let mut broken = trajectory("broken");
        broken.steps[0].reward = 7;

        let err = logger.write(&broken).expect_err("reward out of range");
        assert!(err.to_string().contains("failed schema validation"));
        assert!(!temp.path().join("episode_broken.json").exists());
    }
}
