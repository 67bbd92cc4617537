//! Decision policy abstraction.
//!
//! The [`Policy`] trait decouples the episode runner from whatever produces
//! action text (currently an external command such as `ollama run`). Tests use
//! scripted policies that replay predetermined actions without spawning
//! processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};

use crate::episode::PolicyView;
use crate::io::config::{EnvConfig, PolicyConfig};
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::PromptBuilder;

/// Produces the next raw action for an episode.
///
/// Shared read-only across parallel episodes, hence `Sync`.
pub trait Policy: Sync {
    fn next_action(&self, view: &PolicyView<'_>) -> Result<String>;
}

/// Policy that pipes the rendered prompt into an external command.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    prompt: PromptBuilder,
}

impl CommandPolicy {
    pub fn new(policy: &PolicyConfig, prompt_budget_bytes: usize) -> Result<Self> {
        let (program, args) = policy
            .command
            .split_first()
            .ok_or_else(|| anyhow!("policy.command must name a program"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: policy.timeout(),
            output_limit_bytes: policy.output_limit_bytes,
            prompt: PromptBuilder::new(prompt_budget_bytes),
        })
    }

    pub fn from_config(config: &EnvConfig) -> Result<Self> {
        Self::new(&config.policy, config.prompt_budget_bytes)
    }
}

impl Policy for CommandPolicy {
    #[instrument(skip_all, fields(program = %self.program, step = view.step_count + 1))]
    fn next_action(&self, view: &PolicyView<'_>) -> Result<String> {
        let prompt = self.prompt.build(view)?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run policy command {}", self.program))?;

        if output.timed_out {
            bail!("policy command {} timed out after {:?}", self.program, self.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "policy command failed");
            bail!(
                "policy command {} exited with {:?}: {}",
                self.program,
                output.status.code(),
                output.stderr_excerpt()
            );
        }

        let action = output.stdout_lossy().trim().to_string();
        debug!(prompt_bytes = prompt.len(), action = %action, "policy answered");
        Ok(action)
    }
}
