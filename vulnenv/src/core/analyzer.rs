//! Lexical structural facts over a [`SourceFunction`].
//!
//! Every operation is a pure function of the line sequence. Nothing here
//! understands C: matching is substring and regex based, which keeps the
//! signal fast and deliberately noisy.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::source::{SourceFunction, is_blank_or_comment};
use crate::core::types::{CodeSummary, DataFlow, VarSite};

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());
static FREE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfree\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)").unwrap());
static NULL_ASSIGN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*=\s*NULL\b").unwrap());
static IF_GUARD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bif\s*\(").unwrap());

/// Names matched by the call regex that are control keywords, not calls.
const CONTROL_KEYWORDS: [&str; 6] = ["if", "for", "while", "switch", "return", "sizeof"];
const DECL_KEYWORDS: [&str; 5] = ["int ", "char ", "float ", "double ", "long "];
const LOOP_OPENERS: [&str; 2] = ["for(", "while("];
const UNSAFE_STRING_CALLS: [&str; 4] = ["strcpy", "strcat", "gets", "sprintf"];

/// Stateless view over one function's lines.
#[derive(Debug, Clone, Copy)]
pub struct Analyzer<'a> {
    source: &'a SourceFunction,
}

impl<'a> Analyzer<'a> {
    pub fn new(source: &'a SourceFunction) -> Self {
        Self { source }
    }

    fn lines(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.source.lines().iter().map(String::as_str)
    }

    pub fn summarize_code(&self) -> CodeSummary {
        CodeSummary {
            line_count: self.source.line_count(),
            has_loops: self
                .lines()
                .any(|line| LOOP_OPENERS.iter().any(|kw| line.contains(kw))),
            has_pointers: self
                .lines()
                .any(|line| line.contains('*') || line.contains("->")),
            has_arrays: self
                .lines()
                .any(|line| line.contains('[') && line.contains(']')),
            calls: self.list_functions(),
        }
    }

    /// Declared identifiers in first-occurrence order.
    ///
    /// A declaration is any `;`-terminated line mentioning a primitive type
    /// keyword; the variable is the second whitespace token.
    pub fn list_variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        for line in self.lines() {
            let line = line.trim();
            if !line.contains(';') || !DECL_KEYWORDS.iter().any(|kw| line.contains(kw)) {
                continue;
            }
            let without_semicolons = line.replace(';', "");
            let Some(token) = without_semicolons.split_whitespace().nth(1) else {
                continue;
            };
            let name = token.trim_matches(',');
            if !name.is_empty() && !vars.iter().any(|existing| existing == name) {
                vars.push(name.to_string());
            }
        }
        vars
    }

    /// Called identifiers, alphabetical and duplicate-free.
    pub fn list_functions(&self) -> BTreeSet<String> {
        CALL_RE
            .captures_iter(self.source.text())
            .filter_map(|caps| caps.get(1))
            .map(|name| name.as_str())
            .filter(|name| !CONTROL_KEYWORDS.contains(name))
            .map(str::to_string)
            .collect()
    }

    /// One `(source, destination)` edge per assignment-bearing line.
    pub fn list_dataflows(&self) -> Vec<DataFlow> {
        let mut flows = Vec::new();
        for line in self.lines() {
            if !line.contains('=') || line.contains("==") {
                continue;
            }
            let Some((left, right)) = line.split_once('=') else {
                continue;
            };
            let destination = left
                .split_whitespace()
                .last()
                .unwrap_or_default()
                .trim_matches(|ch: char| ch == ' ' || ch == ',' || ch == ';');
            let source = right
                .trim()
                .trim_matches(|ch: char| ch == ' ' || ch == ';');
            if destination.is_empty() || source.is_empty() {
                continue;
            }
            flows.push(DataFlow {
                source: source.to_string(),
                destination: destination.to_string(),
            });
        }
        flows
    }

    /// `free(ident)` sites, top to bottom, at most one per line.
    pub fn list_freed_variables(&self) -> Vec<VarSite> {
        self.first_capture_per_line(&FREE_RE)
    }

    /// `ident = NULL` sites, top to bottom, at most one per line.
    pub fn list_null_assigned_variables(&self) -> Vec<VarSite> {
        self.first_capture_per_line(&NULL_ASSIGN_RE)
    }

    fn first_capture_per_line(&self, re: &Regex) -> Vec<VarSite> {
        self.lines()
            .enumerate()
            .filter(|(_, line)| !is_blank_or_comment(line))
            .filter_map(|(line_index, line)| {
                let caps = re.captures(line)?;
                Some(VarSite {
                    variable: caps.get(1)?.as_str().to_string(),
                    line_index,
                })
            })
            .collect()
    }

    /// Best-guess vulnerable line (1-based), or -1.
    ///
    /// Search order: unsafe string call, unguarded dereference, `free(`.
    pub fn identify_vulnerable_line(&self) -> i64 {
        let searches: [&dyn Fn(&str) -> bool; 3] = [
            &|line| UNSAFE_STRING_CALLS.iter().any(|call| line.contains(call)),
            &|line| {
                (line.contains('*') || line.contains("->"))
                    && !IF_GUARD_RE.is_match(line)
                    && !line.contains("==")
                    && !line.contains("!=")
            },
            &|line| line.contains("free("),
        ];
        for matches in searches {
            if let Some(index) = self.lines().position(matches) {
                return index as i64 + 1;
            }
        }
        -1
    }
}
