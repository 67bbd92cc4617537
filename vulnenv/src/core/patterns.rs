//! Tri-state vulnerability detectors.
//!
//! Each detector takes the fact it depends on as an `Option`: `None` means the
//! fact has not been gathered in this episode and the verdict is
//! [`TriState::Unknown`]. Scanning is lexical and forward-only; there is no
//! notion of scope, so shadowed names and aliases created through calls are
//! misreported in both directions.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::source::{SourceFunction, is_blank_or_comment};
use crate::core::types::{TriState, VarSite};

/// Calls that copy without a length bound (plus `memcpy`, which is only as
/// safe as its size argument).
const OVERFLOW_SINKS: [&str; 5] = ["strcpy", "strcat", "gets", "sprintf", "memcpy"];
const BOUND_CHECK_IDIOMS: [&str; 3] = ["<=", ">=", "sizeof"];

static INDEXING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\[\]]*\]").unwrap());
static SIMPLE_ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w.>])([A-Za-z_]\w*)\s*=\s*([A-Za-z_]\w*)\s*(?:;|$)").unwrap()
});

/// Per-identifier matchers for the dereference shapes and plain re-assignment.
struct VarMatcher {
    deref: Regex,
    reassign: Regex,
}

impl VarMatcher {
    fn new(var: &str) -> Option<Self> {
        let name = regex::escape(var);
        let deref = Regex::new(&format!(r"\*\s*{name}\b|\b{name}\s*->|\b{name}\s*\[")).ok()?;
        let reassign = Regex::new(&format!(r"(?:^|[^\w.>]){name}\s*=(?:[^=]|$)")).ok()?;
        Some(Self { deref, reassign })
    }

    /// `*var`, `var->` or `var[`.
    fn dereferenced_in(&self, line: &str) -> bool {
        self.deref.is_match(line)
    }

    /// `var = ...` that is not a comparison and not a member or pointee store.
    fn reassigned_in(&self, line: &str) -> bool {
        self.reassign.is_match(line)
    }
}

/// Unbounded copy sink among the calls, or unchecked indexing anywhere.
pub fn buffer_overflow(source: &SourceFunction, functions: Option<&BTreeSet<String>>) -> TriState {
    let Some(functions) = functions else {
        return TriState::Unknown;
    };
    if OVERFLOW_SINKS.iter().any(|sink| functions.contains(*sink)) {
        return TriState::True;
    }
    let text = source.text();
    let unchecked_indexing = INDEXING_RE.is_match(text)
        && !BOUND_CHECK_IDIOMS.iter().any(|idiom| text.contains(idiom));
    TriState::from_bool(unchecked_indexing)
}

/// A NULL-assigned variable dereferenced before it is re-assigned.
pub fn null_deref(source: &SourceFunction, null_assigned: Option<&[VarSite]>) -> TriState {
    let Some(sites) = null_assigned else {
        return TriState::Unknown;
    };
    let lines = source.lines();
    for site in sites {
        let Some(matcher) = VarMatcher::new(&site.variable) else {
            continue;
        };
        for line in lines.iter().skip(site.line_index + 1) {
            if is_blank_or_comment(line) {
                continue;
            }
            // `p = p->next` reads the old binding before overwriting it.
            if matcher.dereferenced_in(line) {
                return TriState::True;
            }
            if matcher.reassigned_in(line) {
                break;
            }
        }
    }
    TriState::False
}

/// A freed variable, or any alias of it, dereferenced after the `free`.
pub fn use_after_free(source: &SourceFunction, freed: Option<&[VarSite]>) -> TriState {
    let Some(sites) = freed else {
        return TriState::Unknown;
    };
    let lines = source.lines();
    let mut matchers: HashMap<String, VarMatcher> = HashMap::new();
    for site in sites {
        let mut aliases = AliasSet::seeded(&site.variable);
        for line in lines.iter().skip(site.line_index + 1) {
            if is_blank_or_comment(line) {
                continue;
            }
            let assignments = simple_assignments(line);
            aliases.extend_from(&assignments);

            for alias in aliases.members() {
                let Some(matcher) = matcher_for(&mut matchers, alias) else {
                    continue;
                };
                if matcher.dereferenced_in(line) {
                    return TriState::True;
                }
            }

            // Only the freed name itself is cleared by re-assignment; aliases accumulate.
            let seed = site.variable.as_str();
            let seed_overwritten = aliases.contains(seed)
                && !aliases.rebinds_to_member(seed, &assignments)
                && matcher_for(&mut matchers, seed)
                    .is_some_and(|matcher| matcher.reassigned_in(line));
            if seed_overwritten {
                aliases.remove(seed);
            }
            if aliases.is_empty() {
                break;
            }
        }
    }
    TriState::False
}

fn matcher_for<'m>(matchers: &'m mut HashMap<String, VarMatcher>, var: &str) -> Option<&'m VarMatcher> {
    if !matchers.contains_key(var) {
        matchers.insert(var.to_string(), VarMatcher::new(var)?);
    }
    matchers.get(var)
}

/// `(lhs, rhs)` pairs for every `ident = ident` on the line.
fn simple_assignments(line: &str) -> Vec<(String, String)> {
    SIMPLE_ASSIGN_RE
        .captures_iter(line)
        .filter_map(|caps| Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string())))
        .collect()
}

/// Names believed to point at one freed allocation.
///
/// Insertion order is kept so scanning is deterministic.
#[derive(Debug, Default)]
struct AliasSet {
    names: Vec<String>,
}

impl AliasSet {
    fn seeded(var: &str) -> Self {
        Self {
            names: vec![var.to_string()],
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|existing| existing == name)
    }

    fn members(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn remove(&mut self, name: &str) {
        self.names.retain(|existing| existing != name);
    }

    /// Grow the set with every `lhs = rhs` whose `rhs` is already a member.
    fn extend_from(&mut self, assignments: &[(String, String)]) {
        for (lhs, rhs) in assignments {
            if self.contains(rhs) && !self.contains(lhs) {
                self.names.push(lhs.clone());
            }
        }
    }

    fn rebinds_to_member(&self, name: &str, assignments: &[(String, String)]) -> bool {
        assignments
            .iter()
            .any(|(lhs, rhs)| lhs == name && self.contains(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analyzer::Analyzer;

    fn uaf(code: &str) -> TriState {
        let source = SourceFunction::new(code);
        let freed = Analyzer::new(&source).list_freed_variables();
        use_after_free(&source, Some(&freed))
    }

    fn npd(code: &str) -> TriState {
        let source = SourceFunction::new(code);
        let sites = Analyzer::new(&source).list_null_assigned_variables();
        null_deref(&source, Some(&sites))
    }

    fn overflow(code: &str) -> TriState {
        let source = SourceFunction::new(code);
        let functions = Analyzer::new(&source).list_functions();
        buffer_overflow(&source, Some(&functions))
    }

    #[test]
    fn detectors_are_unknown_without_prerequisites() {
        let source = SourceFunction::new("free(p);\n*p = 1;");
        assert_eq!(buffer_overflow(&source, None), TriState::Unknown);
        assert_eq!(null_deref(&source, None), TriState::Unknown);
        assert_eq!(use_after_free(&source, None), TriState::Unknown);
    }

    #[test]
    fn use_after_free_follows_aliases() {
        let code = "p = malloc(1);\nfree(p);\nq = p;\n*q = 1;";
        assert_eq!(uaf(code), TriState::True);
    }

    #[test]
    fn use_after_free_aliases_chain() {
        let code = "free(p);\nq = p;\n\n// r is an alias too\nr = q;\nr->len = 0;";
        assert_eq!(uaf(code), TriState::True);
    }

    #[test]
    fn use_after_free_cleared_by_reassignment() {
        let code = "p = malloc(1);\nfree(p);\np = NULL;";
        assert_eq!(uaf(code), TriState::False);
    }

    #[test]
    fn use_after_free_reassigned_name_stops_tracking() {
        let code = "free(p);\np = malloc(8);\np[0] = 1;";
        assert_eq!(uaf(code), TriState::False);
    }

    #[test]
    fn use_after_free_alias_survives_original_reassignment() {
        let code = "free(p);\nq = p;\np = NULL;\nq[0] = 'a';";
        assert_eq!(uaf(code), TriState::True);
    }

    #[test]
    fn use_after_free_alias_is_never_dropped() {
        let code = "free(p);\nq = p;\nq = other;\n*q = 1;";
        assert_eq!(uaf(code), TriState::True);
    }

    #[test]
    fn use_after_free_false_without_frees() {
        assert_eq!(uaf("int x = 1;\nreturn x;"), TriState::False);
    }

    #[test]
    fn null_deref_flags_dereference_before_reassignment() {
        assert_eq!(npd("p = NULL;\n*p;"), TriState::True);
        assert_eq!(npd("p = NULL;\n\nlen = p->len;"), TriState::True);
    }

    #[test]
    fn null_deref_cleared_by_reassignment() {
        assert_eq!(npd("p = NULL;\np = q;\n*p;"), TriState::False);
    }

    #[test]
    fn null_deref_counts_self_referencing_reassignment_as_dereference() {
        assert_eq!(npd("node = NULL;\nnode = node->next;"), TriState::True);
    }

    #[test]
    fn null_deref_ignores_commented_dereference() {
        assert_eq!(npd("p = NULL;\n// *p = 1;\nreturn 0;"), TriState::False);
    }

    #[test]
    fn buffer_overflow_from_sink_call() {
        assert_eq!(overflow("strcpy(dst, src);"), TriState::True);
        assert_eq!(overflow("memcpy(dst, src, n);"), TriState::True);
    }

    #[test]
    fn buffer_overflow_from_unchecked_indexing() {
        assert_eq!(overflow("buf[i] = c;"), TriState::True);
        assert_eq!(
            overflow("if (i >= len) return;\nbuf[i] = c;"),
            TriState::False
        );
        assert_eq!(overflow("return a + b;"), TriState::False);
    }
}
