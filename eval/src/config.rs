//! Environment configuration merging.
//!
//! Applies command-line overrides to the loaded `vulnenv.toml`.

use anyhow::Result;
use vulnenv::core::action::ActionPolicy;
use vulnenv::io::config::EnvConfig;

/// Per-run overrides taken from `eval run` flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub max_steps: Option<u32>,
    pub strict: bool,
}

/// Apply run overrides to the base environment config.
pub fn apply_overrides(mut base: EnvConfig, overrides: &RunOverrides) -> Result<EnvConfig> {
    if let Some(max_steps) = overrides.max_steps {
        base.max_steps = max_steps;
    }
    if overrides.strict {
        base.action_policy = ActionPolicy::Strict;
    }
    base.validate()?;
    Ok(base)
}
