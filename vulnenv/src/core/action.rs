//! Action grammar: `name()`, `name('arg')` or `name(arg)`.
//!
//! The producer of action text is a noisy external policy, so parsing never
//! fails. Text that does not match the grammar classifies as
//! [`Action::Unmatched`] and the episode decides what that costs.

use serde::{Deserialize, Serialize};

use crate::core::types::PatternKind;

/// Actions offered to the policy, in menu order.
pub const ACTION_MENU: [&str; 12] = [
    "summarize_code()",
    "list_variables()",
    "list_functions()",
    "list_dataflows()",
    "list_freed_variables()",
    "list_null_assigned_variables()",
    "check_pattern('buffer_overflow')",
    "check_pattern('null_deref')",
    "check_pattern('use_after_free')",
    "identify_vulnerable_line()",
    "positive_alarm(<int line_number>)",
    "negative_alarm()",
];

const POSITIVE_ALARM: &str = "positive_alarm";

/// How an episode treats text that matches no action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPolicy {
    /// Unmatched text is an invalid no-op that still consumes a turn.
    #[default]
    Permissive,
    /// Unmatched text is rejected and consumes nothing.
    Strict,
}

/// `(name, argument)` split of raw action text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    pub name: String,
    pub arg: Option<String>,
    /// False when the text had no `name(...)` shape at all.
    call_syntax: bool,
}

/// A validated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SummarizeCode,
    ListVariables,
    ListFunctions,
    ListDataflows,
    ListFreedVariables,
    ListNullAssignedVariables,
    IdentifyVulnerableLine,
    CheckPattern(PatternKind),
    /// Terminal "vulnerable" verdict; `line` is set when the argument is an integer.
    PositiveAlarm { line: Option<i64> },
    /// Terminal "safe" verdict.
    NegativeAlarm,
    Unmatched,
}

/// Parse the first line of `raw` into a name and optional argument.
///
/// ```text
/// "check_pattern('null_deref')" -> ("check_pattern", Some("null_deref"))
/// "positive_alarm(42)"          -> ("positive_alarm", Some("42"))
/// "summarize_code()"            -> ("summarize_code", None)
/// ```
pub fn parse_action(raw: &str) -> ParsedAction {
    let first_line = raw.split('\n').next().unwrap_or_default().trim();
    let call = first_line
        .strip_suffix(')')
        .and_then(|body| body.split_once('('));
    let Some((name, arg)) = call else {
        return ParsedAction {
            name: first_line.to_string(),
            arg: None,
            call_syntax: false,
        };
    };
    let arg = strip_matching_quotes(arg.trim());
    ParsedAction {
        name: name.trim().to_string(),
        arg: (!arg.is_empty()).then(|| arg.to_string()),
        call_syntax: true,
    }
}

fn strip_matching_quotes(arg: &str) -> &str {
    for quote in ['\'', '"'] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            return &arg[1..arg.len() - 1];
        }
    }
    arg
}

impl ParsedAction {
    /// Validate against the fixed grammar.
    pub fn classify(&self) -> Action {
        if !self.call_syntax {
            return Action::Unmatched;
        }
        match (self.name.as_str(), self.arg.as_deref()) {
            ("summarize_code", None) => Action::SummarizeCode,
            ("list_variables", None) => Action::ListVariables,
            ("list_functions", None) => Action::ListFunctions,
            ("list_dataflows", None) => Action::ListDataflows,
            ("list_freed_variables", None) => Action::ListFreedVariables,
            ("list_null_assigned_variables", None) => Action::ListNullAssignedVariables,
            ("identify_vulnerable_line", None) => Action::IdentifyVulnerableLine,
            ("negative_alarm", None) => Action::NegativeAlarm,
            ("check_pattern", Some(literal)) => PatternKind::from_literal(literal)
                .map(Action::CheckPattern)
                .unwrap_or(Action::Unmatched),
            (POSITIVE_ALARM, arg) => Action::PositiveAlarm {
                line: arg.and_then(|value| value.trim().parse().ok()),
            },
            _ => Action::Unmatched,
        }
    }

    /// Quote-free `name(arg)` form used in logs and menu bookkeeping.
    pub fn canonical(&self) -> String {
        match &self.arg {
            Some(arg) => format!("{}({})", self.name, arg),
            None => format!("{}()", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_bare_arguments() {
        let quoted = parse_action("check_pattern('buffer_overflow')");
        assert_eq!(quoted.name, "check_pattern");
        assert_eq!(quoted.arg.as_deref(), Some("buffer_overflow"));

        let double = parse_action("check_pattern(\"use_after_free\")");
        assert_eq!(double.arg.as_deref(), Some("use_after_free"));

        let bare = parse_action("  positive_alarm(42)  ");
        assert_eq!(bare.classify(), Action::PositiveAlarm { line: Some(42) });
    }

    #[test]
    fn only_first_line_is_parsed() {
        let parsed = parse_action("negative_alarm()\nBecause all checks were false.");
        assert_eq!(parsed.classify(), Action::NegativeAlarm);
    }

    #[test]
    fn empty_argument_normalizes_to_none() {
        let parsed = parse_action("summarize_code( )");
        assert_eq!(parsed.arg, None);
        assert_eq!(parsed.classify(), Action::SummarizeCode);
        assert_eq!(parse_action("list_dataflows('')").arg, None);
    }

    #[test]
    fn mismatched_quotes_are_kept() {
        let parsed = parse_action("check_pattern('null_deref\")");
        assert_eq!(parsed.arg.as_deref(), Some("'null_deref\""));
        assert_eq!(parsed.classify(), Action::Unmatched);
    }

    #[test]
    fn every_menu_entry_except_placeholder_is_valid() {
        for entry in ACTION_MENU {
            let action = parse_action(entry).classify();
            assert_ne!(action, Action::Unmatched, "{entry}");
        }
        assert_eq!(
            parse_action("positive_alarm(<int line_number>)").classify(),
            Action::PositiveAlarm { line: None }
        );
    }

    #[test]
    fn unrecognized_text_is_unmatched() {
        for raw in [
            "I think the code is vulnerable",
            "summarize_code",
            "summarize_code(5)",
            "check_pattern('format_string')",
            "check_pattern()",
            "negative_alarm(now)",
            "",
        ] {
            assert_eq!(parse_action(raw).classify(), Action::Unmatched, "{raw:?}");
        }
    }

    #[test]
    fn canonical_form_drops_quotes() {
        assert_eq!(
            parse_action("check_pattern('null_deref')").canonical(),
            "check_pattern(null_deref)"
        );
        assert_eq!(parse_action("list_functions()").canonical(), "list_functions()");
    }
}
