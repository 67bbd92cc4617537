//! Drive one episode to completion with a [`Policy`].

use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::episode::{Episode, EpisodeError, Observation, Termination};
use crate::io::policy::Policy;

/// Rejected actions tolerated for a single turn under the strict action policy.
pub const MAX_REJECTIONS_PER_TURN: u32 = 3;

/// One submitted action with the observation it was chosen from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    /// 0-based turn index.
    pub t: u32,
    /// Observation before the action was applied.
    pub observation: Observation,
    pub action: String,
    pub reward: u8,
    pub done: bool,
}

/// Full record of a finished episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTrajectory {
    pub episode_id: String,
    pub label: u8,
    pub steps: Vec<TrajectoryStep>,
    pub step_count: u32,
    /// Strict-policy rejections, which consumed no turn.
    pub rejected_actions: u32,
    pub final_reward: u8,
    pub termination: Termination,
    pub elapsed_secs: f64,
}

/// Reset `episode` and ask `policy` for actions until it is done.
///
/// `on_step` sees each step as soon as it is applied. Policy failures abort
/// the episode; a strict episode that keeps rejecting the policy's text gives
/// up after [`MAX_REJECTIONS_PER_TURN`] attempts on the same turn.
#[instrument(skip_all, fields(episode_id = %episode_id))]
pub fn run_episode<P: Policy + ?Sized, F: FnMut(&TrajectoryStep)>(
    episode_id: &str,
    episode: &mut Episode,
    policy: &P,
    mut on_step: F,
) -> Result<EpisodeTrajectory> {
    let started = Instant::now();
    let mut observation = episode.reset();
    let mut steps = Vec::new();
    let mut rejected_actions = 0u32;
    let mut rejections_this_turn = 0u32;

    while !episode.is_done() {
        let action = policy
            .next_action(&observation.policy_view())
            .with_context(|| format!("policy failed at step {}", episode.step_count() + 1))?;
        let outcome = match episode.step(&action) {
            Ok(outcome) => outcome,
            Err(EpisodeError::UnrecognizedAction { raw }) => {
                rejected_actions += 1;
                rejections_this_turn += 1;
                warn!(raw = %raw, attempt = rejections_this_turn, "action rejected");
                if rejections_this_turn >= MAX_REJECTIONS_PER_TURN {
                    bail!(
                        "policy produced {rejections_this_turn} unrecognized actions in a row at step {}",
                        episode.step_count() + 1
                    );
                }
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        rejections_this_turn = 0;

        let step = TrajectoryStep {
            t: u32::try_from(steps.len()).context("step index overflow")?,
            observation,
            action,
            reward: outcome.reward,
            done: outcome.done,
        };
        on_step(&step);
        steps.push(step);
        observation = outcome.observation;
    }

    let termination = episode
        .termination()
        .ok_or_else(|| anyhow!("finished episode has no termination"))?;
    let final_reward = episode.reward().unwrap_or_default();
    let elapsed_secs = started.elapsed().as_secs_f64();
    info!(
        steps = episode.step_count(),
        reward = final_reward,
        ?termination,
        elapsed_secs,
        "episode finished"
    );
    Ok(EpisodeTrajectory {
        episode_id: episode_id.to_string(),
        label: episode.label(),
        steps,
        step_count: episode.step_count(),
        rejected_actions,
        final_reward,
        termination,
        elapsed_secs,
    })
}
