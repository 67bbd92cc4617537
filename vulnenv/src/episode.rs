//! Episode state machine: one function, one label, a bounded number of steps.
//!
//! An episode is `Running` until a terminal action or the step budget ends it,
//! then `Done` forever. Facts are computed lazily, once, the first time an
//! action asks for them. The reward is binary and is assigned exactly once, at
//! the step that ends the episode.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::action::{Action, ActionPolicy, parse_action};
use crate::core::analyzer::Analyzer;
use crate::core::patterns;
use crate::core::source::SourceFunction;
use crate::core::types::{AnalysisState, PatternKind};

pub const DEFAULT_MAX_STEPS: u32 = 20;

/// Ground-truth label of a vulnerable function.
pub const LABEL_VULNERABLE: u8 = 1;
/// Ground-truth label of a safe function.
pub const LABEL_SAFE: u8 = 0;

/// Usage faults raised by [`Episode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EpisodeError {
    #[error("episode already finished; call reset() before stepping again")]
    AlreadyDone,
    #[error("unrecognized action {raw:?} rejected by strict action policy")]
    UnrecognizedAction { raw: String },
    #[error("invalid episode config: {0}")]
    InvalidConfig(String),
}

/// Constructor-time episode settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeConfig {
    pub max_steps: u32,
    pub action_policy: ActionPolicy,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            action_policy: ActionPolicy::Permissive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validity {
    Valid,
    Invalid,
}

/// One submitted action, as parsed and judged at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// 1-based step at which the action was submitted.
    pub step: u32,
    pub raw: String,
    pub name: String,
    pub arg: Option<String>,
    pub validity: Validity,
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    PositiveAlarm { line: Option<i64> },
    NegativeAlarm,
    /// Step budget ran out; scored as an implicit "safe" verdict.
    StepBudget,
}

/// Full snapshot of an episode after a step.
///
/// Carries the ground-truth label for scoring and logging. Hand the decision
/// policy a [`PolicyView`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub code: String,
    pub label: u8,
    pub step_count: u32,
    pub max_steps: u32,
    pub done: bool,
    pub state: AnalysisState,
    pub history: Vec<ActionRecord>,
}

impl Observation {
    /// Label-free borrow of this observation.
    pub fn policy_view(&self) -> PolicyView<'_> {
        PolicyView {
            code: &self.code,
            step_count: self.step_count,
            max_steps: self.max_steps,
            state: &self.state,
            history: &self.history,
        }
    }
}

/// What the decision policy is allowed to see.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PolicyView<'a> {
    pub code: &'a str,
    pub step_count: u32,
    pub max_steps: u32,
    pub state: &'a AnalysisState,
    pub history: &'a [ActionRecord],
}

/// Result of [`Episode::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub observation: Observation,
    /// 0 on every step except the one that ends the episode.
    pub reward: u8,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct Episode {
    source: SourceFunction,
    label: u8,
    config: EpisodeConfig,
    step_count: u32,
    done: bool,
    state: AnalysisState,
    history: Vec<ActionRecord>,
    reward: Option<u8>,
    termination: Option<Termination>,
}

impl Episode {
    /// Create an episode in its reset state.
    pub fn new(code: impl Into<String>, label: u8, config: EpisodeConfig) -> Result<Self, EpisodeError> {
        if config.max_steps == 0 {
            return Err(EpisodeError::InvalidConfig("max_steps must be > 0".to_string()));
        }
        if label != LABEL_SAFE && label != LABEL_VULNERABLE {
            return Err(EpisodeError::InvalidConfig(format!(
                "label must be 0 or 1, got {label}"
            )));
        }
        let mut episode = Self {
            source: SourceFunction::new(code),
            label,
            config,
            step_count: 0,
            done: false,
            state: AnalysisState::default(),
            history: Vec::new(),
            reward: None,
            termination: None,
        };
        episode.reset();
        Ok(episode)
    }

    /// Forget every gathered fact and the history; start a fresh run.
    pub fn reset(&mut self) -> Observation {
        self.step_count = 0;
        self.done = false;
        self.state = AnalysisState::default();
        self.history.clear();
        self.reward = None;
        self.termination = None;
        self.observation()
    }

    /// Submit one raw action.
    ///
    /// Under [`ActionPolicy::Permissive`] this only fails when the episode is
    /// already done.
    pub fn step(&mut self, raw: &str) -> Result<StepOutcome, EpisodeError> {
        if self.done {
            return Err(EpisodeError::AlreadyDone);
        }
        let parsed = parse_action(raw);
        let action = parsed.classify();
        if action == Action::Unmatched && self.config.action_policy == ActionPolicy::Strict {
            return Err(EpisodeError::UnrecognizedAction {
                raw: raw.to_string(),
            });
        }

        self.step_count += 1;
        let mut reward = 0;
        match action {
            Action::PositiveAlarm { line } => {
                reward = self.finish(Termination::PositiveAlarm { line });
            }
            Action::NegativeAlarm => {
                reward = self.finish(Termination::NegativeAlarm);
            }
            other => self.gather(other),
        }
        if !self.done && self.step_count >= self.config.max_steps {
            debug!(step = self.step_count, "step budget exhausted");
            reward = self.finish(Termination::StepBudget);
        }

        let validity = if action == Action::Unmatched {
            Validity::Invalid
        } else {
            Validity::Valid
        };
        debug!(step = self.step_count, action = %parsed.canonical(), ?validity, reward, done = self.done, "episode step");
        self.history.push(ActionRecord {
            step: self.step_count,
            raw: raw.to_string(),
            name: parsed.name,
            arg: parsed.arg,
            validity,
        });

        Ok(StepOutcome {
            observation: self.observation(),
            reward,
            done: self.done,
        })
    }

    /// Run a non-terminal action against the cache.
    fn gather(&mut self, action: Action) {
        let analyzer = Analyzer::new(&self.source);
        let state = &mut self.state;
        match action {
            Action::SummarizeCode => {
                state.summary.get_or_insert_with(|| analyzer.summarize_code());
            }
            Action::ListVariables => {
                state.variables.get_or_insert_with(|| analyzer.list_variables());
            }
            Action::ListFunctions => {
                state.functions.get_or_insert_with(|| analyzer.list_functions());
            }
            Action::ListDataflows => {
                state.dataflows.get_or_insert_with(|| analyzer.list_dataflows());
            }
            Action::ListFreedVariables => {
                state
                    .freed_variables
                    .get_or_insert_with(|| analyzer.list_freed_variables());
            }
            Action::ListNullAssignedVariables => {
                state
                    .null_assigned_variables
                    .get_or_insert_with(|| analyzer.list_null_assigned_variables());
            }
            Action::IdentifyVulnerableLine => {
                state
                    .suspected_line
                    .get_or_insert_with(|| analyzer.identify_vulnerable_line());
            }
            Action::CheckPattern(kind) => {
                let verdict = match kind {
                    PatternKind::BufferOverflow => {
                        patterns::buffer_overflow(&self.source, state.functions.as_ref())
                    }
                    PatternKind::NullDeref => patterns::null_deref(
                        &self.source,
                        state.null_assigned_variables.as_deref(),
                    ),
                    PatternKind::UseAfterFree => {
                        patterns::use_after_free(&self.source, state.freed_variables.as_deref())
                    }
                };
                state.pattern_results.set(kind, verdict);
            }
            Action::PositiveAlarm { .. } | Action::NegativeAlarm | Action::Unmatched => {}
        }
    }

    /// End the episode and score the verdict implied by `termination`.
    fn finish(&mut self, termination: Termination) -> u8 {
        let says_vulnerable = matches!(termination, Termination::PositiveAlarm { .. });
        let reward = u8::from(says_vulnerable == (self.label == LABEL_VULNERABLE));
        self.done = true;
        self.reward = Some(reward);
        self.termination = Some(termination);
        reward
    }

    pub fn observation(&self) -> Observation {
        Observation {
            code: self.source.text().to_string(),
            label: self.label,
            step_count: self.step_count,
            max_steps: self.config.max_steps,
            done: self.done,
            state: self.state.clone(),
            history: self.history.clone(),
        }
    }

    pub fn history(&self) -> &[ActionRecord] {
        &self.history
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    pub fn label(&self) -> u8 {
        self.label
    }

    pub fn config(&self) -> EpisodeConfig {
        self.config
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Terminal reward, `None` while running.
    pub fn reward(&self) -> Option<u8> {
        self.reward
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }
}
