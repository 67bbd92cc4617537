//! Shared deterministic types for the analysis core.
//!
//! These types define stable contracts between the analyzer, the episode state
//! machine and everything that serializes an observation. They carry no I/O.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Three-valued detector verdict.
///
/// `Unknown` means the prerequisite fact was not gathered yet. It is distinct
/// from `False`, which means the detector ran and found nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    #[default]
    Unknown,
    True,
    False,
}

impl TriState {
    pub fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::True => "true",
            Self::False => "false",
        }
    }
}

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three fixed heuristic detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    BufferOverflow,
    NullDeref,
    UseAfterFree,
}

impl PatternKind {
    pub const ALL: [PatternKind; 3] = [
        PatternKind::BufferOverflow,
        PatternKind::NullDeref,
        PatternKind::UseAfterFree,
    ];

    /// Literal used in `check_pattern('<literal>')`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BufferOverflow => "buffer_overflow",
            Self::NullDeref => "null_deref",
            Self::UseAfterFree => "use_after_free",
        }
    }

    pub fn from_literal(literal: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == literal)
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector verdicts. Always holds exactly one entry per [`PatternKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternResults {
    pub buffer_overflow: TriState,
    pub null_deref: TriState,
    pub use_after_free: TriState,
}

impl PatternResults {
    pub fn get(&self, kind: PatternKind) -> TriState {
        match kind {
            PatternKind::BufferOverflow => self.buffer_overflow,
            PatternKind::NullDeref => self.null_deref,
            PatternKind::UseAfterFree => self.use_after_free,
        }
    }

    pub fn set(&mut self, kind: PatternKind, value: TriState) {
        match kind {
            PatternKind::BufferOverflow => self.buffer_overflow = value,
            PatternKind::NullDeref => self.null_deref = value,
            PatternKind::UseAfterFree => self.use_after_free = value,
        }
    }

    /// Verdicts in [`PatternKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (PatternKind, TriState)> + '_ {
        PatternKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }
}

/// Structural digest returned by `summarize_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSummary {
    pub line_count: usize,
    pub has_loops: bool,
    pub has_pointers: bool,
    pub has_arrays: bool,
    pub calls: BTreeSet<String>,
}

/// Assignment-derived edge: `destination = source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlow {
    pub source: String,
    pub destination: String,
}

/// Identifier observed at a 0-based line index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarSite {
    pub variable: String,
    pub line_index: usize,
}

/// Facts gathered so far in one episode.
///
/// Every `Option` starts as `None` ("not gathered") and is filled at most once;
/// the analyzer is deterministic over immutable source, so a second request is
/// a cache hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisState {
    pub summary: Option<CodeSummary>,
    pub variables: Option<Vec<String>>,
    pub functions: Option<BTreeSet<String>>,
    pub dataflows: Option<Vec<DataFlow>>,
    pub freed_variables: Option<Vec<VarSite>>,
    pub null_assigned_variables: Option<Vec<VarSite>>,
    pub pattern_results: PatternResults,
    /// 1-based line number, or -1 when no line looked suspicious.
    pub suspected_line: Option<i64>,
}
