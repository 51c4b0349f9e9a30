//! Per-agent-kind specialization.
//!
//! The executor and planner are generic; what makes the test generator,
//! flaky fixer, and self-healing fixer behave differently is (a) the
//! directive paragraph injected at the top of every planning prompt and
//! (b) the set of action types exposed to each of them. Both live here.

use crate::qaforge::execution::AgentKind;
use serde_json::Value;

/// Action types each agent kind may plan. The LLM planner filters the
/// prompt catalog to this set, and the executor refuses to dispatch a
/// planned action outside it, so one shared registry can serve every kind.
pub fn allowed_action_types(kind: AgentKind) -> &'static [&'static str] {
    match kind {
        AgentKind::TestGenerator => &[
            "fetch_story",
            "query_element_registry",
            "generate_test_intent",
            "write_test_file",
            "execute_test",
            "request_approval",
        ],
        AgentKind::FlakyFixer => &[
            "read_file",
            "execute_test",
            "analyze_failure",
            "write_test_file",
            "git_workflow",
            "request_approval",
        ],
        AgentKind::SelfHealingFixer => &[
            "read_file",
            "capture_page_html",
            "extract_broken_locator",
            "discover_locator",
            "suggest_locator_fix",
            "analyze_failure",
            "update_element_registry",
            "write_test_file",
            "execute_test",
            "request_approval",
        ],
    }
}

/// Pull a numeric knob out of the opaque custom-config mapping.
fn custom_u32(custom: &Value, key: &str, default: u32) -> u32 {
    custom
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default)
}

/// Build the directive paragraph for one agent kind.
///
/// `custom` is the execution's opaque custom-config mapping; the flaky
/// fixer reads `stability_check_runs` and `verification_runs` from it.
pub fn directive(kind: AgentKind, custom: &Value) -> String {
    match kind {
        AgentKind::TestGenerator => String::from(
            "You are an automated test generator. Work a tracker story into a \
             reviewed browser test: fetch the story, consult the element \
             registry for known locators, produce a test intent, write it to \
             the drafts area, and request approval for the draft. Declare the \
             goal reached once the draft is approved (or written, when no \
             approval gate applies).",
        ),
        AgentKind::FlakyFixer => {
            let stability_runs = custom_u32(custom, "stability_check_runs", 5);
            let verification_runs = custom_u32(custom, "verification_runs", 5);
            format!(
                "You are a flaky-test fixer. First reproduce the flake: execute \
                 the original test {} times and count failures. Then propose a \
                 stability fix, write it, and verify it by executing the fixed \
                 test {} times. Only when at least {} of the {} verification \
                 runs pass may you start the git workflow (branch, commit, PR) \
                 and request approval. If verification keeps failing, give up \
                 and request a manual review instead.",
                stability_runs,
                verification_runs,
                verification_runs.saturating_sub(1).max(1),
                verification_runs
            )
        }
        AgentKind::SelfHealingFixer => String::from(
            "You are a self-healing test fixer. A test failed on a broken \
             locator. Capture the page HTML, extract the broken locator from \
             the failure, and look for a registered fallback locator. If a \
             fallback verifies, update the test and the element registry and \
             request approval for the fix. If no fallback works, request a \
             manual-review approval and give up gracefully.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolsets_differ_per_kind() {
        let generator = allowed_action_types(AgentKind::TestGenerator);
        let healer = allowed_action_types(AgentKind::SelfHealingFixer);
        assert!(generator.contains(&"fetch_story"));
        assert!(!generator.contains(&"capture_page_html"));
        assert!(healer.contains(&"discover_locator"));
        assert!(healer.contains(&"extract_broken_locator"));
    }

    #[test]
    fn flaky_directive_reads_custom_config() {
        let custom = serde_json::json!({"stability_check_runs": 7, "verification_runs": 3});
        let text = directive(AgentKind::FlakyFixer, &custom);
        assert!(text.contains("7 times"));
        assert!(text.contains("3 times"));

        let default_text = directive(AgentKind::FlakyFixer, &serde_json::json!({}));
        assert!(default_text.contains("5 times"));
    }
}
