//! Prompt rendering for the external decision policy.
//!
//! The prompt is built only from a [`PolicyView`], which has no label field,
//! so nothing rendered here can reveal the ground truth.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::action::{ACTION_MENU, parse_action};
use crate::core::types::{CodeSummary, DataFlow, VarSite};
use crate::episode::PolicyView;

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");
const UNKNOWN: &str = "(unknown)";
const NONE: &str = "(none)";
const TRUNCATED_MARK: &str = "\n[truncated]";

/// Droppable sections, least useful first.
const DROP_ORDER: [&str; 3] = ["dataflows", "variables", "functions"];

#[derive(Debug, Clone, Serialize)]
struct PatternLine {
    name: &'static str,
    value: &'static str,
}

/// One `<!-- section:KEY required|droppable -->` block of rendered output.
#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if required || !content.is_empty() {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then cut the tail of the last one.
fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(section = key, bytes_dropped = dropped.content.len(), "dropped prompt section");
        }
    }

    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let allowed = budget.saturating_sub(total - last.content.len());
    let before = last.content.len();
    let keep = allowed.saturating_sub(TRUNCATED_MARK.len());
    let cut = floor_char_boundary(&last.content, keep);
    last.content.truncate(cut);
    if allowed > TRUNCATED_MARK.len() {
        last.content.push_str(TRUNCATED_MARK);
    }
    debug!(section = %last.key, before, after = last.content.len(), "truncated prompt section");
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

/// Renders the agent prompt within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, view: &PolicyView<'_>) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("agent", AGENT_TEMPLATE)
            .context("load agent prompt template")?;
        let state = view.state;
        let rendered = env
            .get_template("agent")?
            .render(context! {
                step => view.step_count + 1,
                max_steps => view.max_steps,
                remaining_steps => view.max_steps.saturating_sub(view.step_count),
                summary => state.summary.as_ref().map_or_else(|| UNKNOWN.to_string(), describe_summary),
                functions => describe_list(state.functions.as_ref().map(|set| set.iter().cloned().collect())),
                variables => describe_list(state.variables.clone()),
                dataflows => describe_list(state.dataflows.as_deref().map(describe_flows)),
                freed => describe_list(state.freed_variables.as_deref().map(describe_sites)),
                null_assigned => describe_list(state.null_assigned_variables.as_deref().map(describe_sites)),
                suspected_line => state.suspected_line.map_or_else(|| UNKNOWN.to_string(), |line| line.to_string()),
                patterns => state.pattern_results.iter().map(|(kind, value)| PatternLine {
                    name: kind.as_str(),
                    value: value.as_str(),
                }).collect::<Vec<_>>(),
                actions => remaining_actions(view),
                code => number_lines(view.code),
            })
            .context("render agent prompt")?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Menu entries whose canonical form has not been submitted yet.
pub fn remaining_actions(view: &PolicyView<'_>) -> Vec<&'static str> {
    let taken: BTreeSet<String> = view
        .history
        .iter()
        .map(|record| match &record.arg {
            Some(arg) => format!("{}({})", record.name, arg),
            None => format!("{}()", record.name),
        })
        .collect();
    ACTION_MENU
        .iter()
        .copied()
        .filter(|entry| !taken.contains(&parse_action(entry).canonical()))
        .collect()
}

fn describe_summary(summary: &CodeSummary) -> String {
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    let calls = if summary.calls.is_empty() {
        NONE.to_string()
    } else {
        summary.calls.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "lines: {}\nloops: {}\npointers: {}\narrays: {}\ncalls: {}",
        summary.line_count,
        yes_no(summary.has_loops),
        yes_no(summary.has_pointers),
        yes_no(summary.has_arrays),
        calls
    )
}

fn describe_list(items: Option<Vec<String>>) -> String {
    match items {
        None => UNKNOWN.to_string(),
        Some(items) if items.is_empty() => NONE.to_string(),
        Some(items) => items.join(", "),
    }
}

fn describe_flows(flows: &[DataFlow]) -> Vec<String> {
    flows
        .iter()
        .map(|flow| format!("{} -> {}", flow.source, flow.destination))
        .collect()
}

fn describe_sites(sites: &[VarSite]) -> Vec<String> {
    sites
        .iter()
        .map(|site| format!("{} (line {})", site.variable, site.line_index + 1))
        .collect()
}

fn number_lines(code: &str) -> String {
    code.split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:>4} | {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{Episode, EpisodeConfig, LABEL_SAFE, LABEL_VULNERABLE};
    use crate::test_support::UAF_FUNCTION;

    fn episode(label: u8) -> Episode {
        Episode::new(UAF_FUNCTION, label, EpisodeConfig::default()).expect("episode")
    }

    #[test]
    fn sections_render_in_stable_order() {
        let ep = episode(LABEL_VULNERABLE);
        let observation = ep.observation();
        let prompt = PromptBuilder::new(100_000)
            .build(&observation.policy_view())
            .expect("render");

        let order = [
            "### Task",
            "### Progress",
            "### Summary",
            "### Called Functions",
            "### Variables",
            "### Data Flows",
            "### Memory Events",
            "### Pattern Checks",
            "### Available Actions",
            "### Answer Format",
            "### Code",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|header| prompt.find(header).unwrap_or_else(|| panic!("missing {header}")))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(prompt.contains("Step 1 of 20"));
        assert!(prompt.contains("Freed: (unknown)"));
        assert!(prompt.contains("- buffer_overflow: unknown"));
        assert!(prompt.contains("   1 | "));
    }

    #[test]
    fn prompt_is_identical_for_either_label() {
        let safe = episode(LABEL_SAFE).observation();
        let vulnerable = episode(LABEL_VULNERABLE).observation();
        let builder = PromptBuilder::new(100_000);
        assert_eq!(
            builder.build(&safe.policy_view()).expect("safe"),
            builder.build(&vulnerable.policy_view()).expect("vulnerable")
        );
    }

    #[test]
    fn taken_actions_leave_the_menu() {
        let mut ep = episode(LABEL_VULNERABLE);
        ep.step("list_freed_variables()").expect("step");
        let outcome = ep.step("check_pattern(\"use_after_free\")").expect("step");

        let remaining = remaining_actions(&outcome.observation.policy_view());
        assert!(!remaining.contains(&"list_freed_variables()"));
        assert!(!remaining.contains(&"check_pattern('use_after_free')"));
        assert!(remaining.contains(&"check_pattern('null_deref')"));
        assert_eq!(remaining.len(), ACTION_MENU.len() - 2);

        let prompt = PromptBuilder::new(100_000)
            .build(&outcome.observation.policy_view())
            .expect("render");
        assert!(prompt.contains("- use_after_free: "));
        assert!(!prompt.contains("Freed: (unknown)"));
    }

    #[test]
    fn budget_drops_dataflows_before_variables_and_functions() {
        let mut sections = vec![
            Section { key: "contract".into(), required: true, content: "c".repeat(10) },
            Section { key: "functions".into(), required: false, content: "f".repeat(10) },
            Section { key: "variables".into(), required: false, content: "v".repeat(10) },
            Section { key: "dataflows".into(), required: false, content: "d".repeat(10) },
        ];
        apply_budget(&mut sections, 30);
        let keys: Vec<&str> = sections.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["contract", "functions", "variables"]);

        apply_budget(&mut sections, 20);
        let keys: Vec<&str> = sections.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["contract", "functions"]);
    }

    #[test]
    fn budget_truncates_last_section_when_drops_are_not_enough() {
        let code = "    counter = counter + 1;\n".repeat(200);
        let ep = Episode::new(code, LABEL_SAFE, EpisodeConfig::default()).expect("episode");
        let prompt = PromptBuilder::new(2_500)
            .build(&ep.observation().policy_view())
            .expect("render");
        assert!(!prompt.contains("### Data Flows"));
        assert!(!prompt.contains("### Variables"));
        assert!(!prompt.contains("### Called Functions"));
        assert!(prompt.contains("### Task"));
        assert!(prompt.ends_with("[truncated]"));
    }

    #[test]
    fn parse_sections_skips_empty_droppable_blocks() {
        let rendered = "<!-- section:a required -->\nA\n<!-- section:b droppable -->\n\n<!-- section:c required -->\n";
        let sections = parse_sections(rendered);
        let keys: Vec<&str> = sections.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["a", "c"]);
    }
}
