//! Environment configuration stored in `vulnenv.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::action::ActionPolicy;
use crate::episode::{DEFAULT_MAX_STEPS, EpisodeConfig};

/// Default config file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "vulnenv.toml";

/// Environment configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values used for batch runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvConfig {
    /// Turns per episode before the implicit "safe" verdict.
    pub max_steps: u32,

    /// How unrecognized action text is treated.
    pub action_policy: ActionPolicy,

    /// Maximum bytes of rendered prompt before droppable sections are removed.
    pub prompt_budget_bytes: usize,

    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Command that reads a prompt on stdin and prints one action on stdout.
    pub command: Vec<String>,

    /// Wall-clock budget for one policy call, in seconds.
    pub timeout_secs: u64,

    /// Truncate policy stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "ollama".to_string(),
                "run".to_string(),
                "llama3.2".to_string(),
            ],
            timeout_secs: 300,
            output_limit_bytes: 100_000,
        }
    }
}

impl PolicyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            action_policy: ActionPolicy::Permissive,
            prompt_budget_bytes: 40_000,
            policy: PolicyConfig::default(),
        }
    }
}

impl EnvConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.policy.timeout_secs == 0 {
            return Err(anyhow!("policy.timeout_secs must be > 0"));
        }
        if self.policy.output_limit_bytes == 0 {
            return Err(anyhow!("policy.output_limit_bytes must be > 0"));
        }
        if self.policy.command.is_empty() || self.policy.command[0].trim().is_empty() {
            return Err(anyhow!("policy.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn episode_config(&self) -> EpisodeConfig {
        EpisodeConfig {
            max_steps: self.max_steps,
            action_policy: self.action_policy,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EnvConfig::default()`.
pub fn load_config(path: &Path) -> Result<EnvConfig> {
    if !path.exists() {
        let cfg = EnvConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EnvConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EnvConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EnvConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("vulnenv.toml");
        let cfg = EnvConfig {
            max_steps: 12,
            action_policy: ActionPolicy::Strict,
            ..EnvConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("vulnenv.toml");
        fs::write(&path, "max_steps = 10\n\n[policy]\ncommand = [\"cat\"]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_steps, 10);
        assert_eq!(cfg.policy.command, vec!["cat"]);
        assert_eq!(cfg.policy.timeout_secs, 300);
        assert_eq!(cfg.action_policy, ActionPolicy::Permissive);
    }

    #[test]
    fn rejects_zero_max_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("vulnenv.toml");
        fs::write(&path, "max_steps = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(err.to_string().contains("max_steps"));
    }
}
