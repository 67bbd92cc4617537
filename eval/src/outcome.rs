use serde::{Deserialize, Serialize};

use vulnenv::episode::Termination;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Verdict matched the label.
    Correct,
    Incorrect,
    /// The episode could not be played (policy failure, invalid sample).
    Error,
}

pub fn classify_outcome(final_reward: Option<u8>) -> Outcome {
    match final_reward {
        Some(1) => Outcome::Correct,
        Some(_) => Outcome::Incorrect,
        None => Outcome::Error,
    }
}

/// The episode ran out of steps instead of reaching a verdict.
pub fn is_truncated(termination: Option<&Termination>) -> bool {
    matches!(termination, Some(Termination::StepBudget))
}
