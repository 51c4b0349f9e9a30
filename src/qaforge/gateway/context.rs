//! Prompt assembly for the gateway's task kinds.
//!
//! The gateway owns prompt construction so that callers cannot bypass the
//! format directives that force structured output. Test generation prompts
//! combine the story (normalized into Gherkin-like criteria), an optional
//! API-surface context, the element-registry catalog filtered to the pages
//! the story mentions, and a directive instructing the model to emit a
//! Test Intent JSON — never free-form code. Failure-analysis prompts embed
//! the captured page HTML bounded to 50 KB.

use crate::qaforge::collab::issue_tracker::Story;
use crate::qaforge::element_registry::ElementRegistry;

/// Upper bound on embedded page HTML, in bytes.
pub const MAX_HTML_BYTES: usize = 50 * 1024;

/// Normalize acceptance criteria into a Gherkin-like block.
///
/// Lines already starting with a Gherkin keyword keep it (capitalized);
/// anything else is treated as an expected outcome and prefixed with
/// `Then`.
pub fn normalize_gherkin(criteria: &[String]) -> String {
    let mut block = String::new();
    for criterion in criteria {
        let trimmed = criterion.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        const KEYWORDS: [&str; 5] = ["given", "when", "then", "and", "but"];
        let keyword = KEYWORDS
            .iter()
            .copied()
            .find(|k| {
                // Keyword must be a whole word ("given " not "givenx").
                lowered.starts_with(k)
                    && trimmed
                        .chars()
                        .nth(k.len())
                        .map(|c| c.is_whitespace())
                        .unwrap_or(false)
            });
        match keyword {
            Some(k) => {
                let mut capitalized = String::new();
                let mut chars = k.chars();
                if let Some(first) = chars.next() {
                    capitalized.push(first.to_ascii_uppercase());
                    capitalized.push_str(chars.as_str());
                }
                block.push_str(&format!("{}{}\n", capitalized, &trimmed[k.len()..]));
            }
            None => block.push_str(&format!("Then {}\n", trimmed)),
        }
    }
    block
}

/// Directive appended to every generation prompt: emit intent JSON only.
fn intent_format_directive() -> &'static str {
    "OUTPUT FORMAT:\n\
     Respond with ONLY a JSON object (no prose, no code fences) of the form:\n\
     {\"className\": \"<PageObjectClass>\", \"testClassName\": \"<TestClass>\", \"steps\": [\n\
       {\"action\": \"NAVIGATE\", \"value\": \"<url>\"},\n\
       {\"action\": \"FILL\", \"locator\": \"testid=<id>\", \"value\": \"<text>\"},\n\
       {\"action\": \"CLICK\", \"locator\": \"testid=<id>\"},\n\
       {\"action\": \"ASSERT_URL\", \"value\": \"<regex>\"}\n\
     ]}\n\
     Allowed actions: NAVIGATE, FILL, CLICK, CLICK_ROLE, PRESS_KEY, SELECT_OPTION,\n\
     WAIT_FOR_SELECTOR, WAIT_FOR_URL, ASSERT_URL, ASSERT_TEXT, ASSERT_TITLE,\n\
     ASSERT_COUNT, ASSERT_VALUE, ASSERT_VISIBLE, RELOAD.\n\
     Locators use strategy=value form (testid=, css=, role=, label=, placeholder=,\n\
     text=, xpath=). Prefer locators from the known-elements catalog.\n"
}

/// Build the test-generation prompt for a story.
pub fn build_test_generation_prompt(
    story: &Story,
    api_context: Option<&str>,
    registry: &ElementRegistry,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are generating an automated browser test for this story.\n\n");
    prompt.push_str(&format!("STORY {}: {}\n", story.key, story.summary));
    if !story.description.trim().is_empty() {
        prompt.push_str(&format!("\n{}\n", story.description.trim()));
    }

    let gherkin = normalize_gherkin(&story.acceptance_criteria);
    if !gherkin.is_empty() {
        prompt.push_str("\nACCEPTANCE CRITERIA:\n");
        prompt.push_str(&gherkin);
    }

    if let Some(api) = api_context {
        if !api.trim().is_empty() {
            prompt.push_str("\nAPI CONTEXT:\n");
            prompt.push_str(api.trim());
            prompt.push('\n');
        }
    }

    let mut story_text = format!(
        "{} {} {}",
        story.summary,
        story.description,
        story.acceptance_criteria.join(" ")
    );
    story_text.push(' ');
    story_text.push_str(&story.components.join(" "));
    let pages = registry.pages_mentioned_in(&story_text);
    prompt.push('\n');
    prompt.push_str(&registry.catalog(&pages));

    prompt.push('\n');
    prompt.push_str(intent_format_directive());
    prompt
}

/// Truncate HTML to [`MAX_HTML_BYTES`] on a char boundary.
fn bounded_html(html: &str) -> &str {
    if html.len() <= MAX_HTML_BYTES {
        return html;
    }
    let mut end = MAX_HTML_BYTES;
    while end > 0 && !html.is_char_boundary(end) {
        end -= 1;
    }
    &html[..end]
}

/// Build the failure-analysis prompt for a broken test run.
pub fn build_failure_analysis_prompt(
    page_html: &str,
    failing_step_index: usize,
    broken_locator: &str,
    error_message: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("A generated browser test failed. Analyze why and identify the element.\n\n");
    prompt.push_str(&format!("FAILING STEP INDEX: {}\n", failing_step_index));
    prompt.push_str(&format!("BROKEN LOCATOR: {}\n", broken_locator));
    prompt.push_str(&format!("DRIVER ERROR: {}\n", error_message));
    prompt.push_str("\nCAPTURED PAGE HTML (may be truncated):\n");
    prompt.push_str(bounded_html(page_html));
    prompt.push_str(
        "\n\nDescribe, in prose, what changed on the page and which selector now \
         matches the intended element.\n",
    );
    prompt
}

/// Build the fix-suggestion prompt: propose a replacement locator.
pub fn build_fix_suggestion_prompt(
    broken_locator: &str,
    candidate_fallbacks: &[String],
    analysis: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Propose a replacement locator for a broken browser-test step.\n\n");
    prompt.push_str(&format!("BROKEN LOCATOR: {}\n", broken_locator));
    if !candidate_fallbacks.is_empty() {
        prompt.push_str("REGISTERED FALLBACKS (best first):\n");
        for fallback in candidate_fallbacks {
            prompt.push_str(&format!("- {}\n", fallback));
        }
    }
    if !analysis.trim().is_empty() {
        prompt.push_str("\nPRIOR ANALYSIS:\n");
        prompt.push_str(analysis.trim());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nAnswer with the single best locator in strategy=value form and one \
         sentence of justification.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> Story {
        Story {
            key: "SCRUM-7".to_string(),
            summary: "Implement user login".to_string(),
            description: "Users sign in on the login page".to_string(),
            acceptance_criteria: vec![
                "Given a registered user on the login page".to_string(),
                "when they submit valid credentials".to_string(),
                "the inventory page is shown".to_string(),
            ],
            labels: vec![],
            components: vec![],
            assignee: None,
        }
    }

    fn registry() -> ElementRegistry {
        ElementRegistry::from_json(
            r#"{"version":"1","pages":{
                "LoginPage":{"url":"https://www.saucedemo.com","elements":{
                    "username":{"strategy":"testid","value":"username","playwrightCode":""}}},
                "CheckoutPage":{"url":"https://www.saucedemo.com/checkout.html","elements":{}}
            }}"#,
        )
        .unwrap()
    }

    #[test]
    fn gherkin_normalization_keeps_keywords_and_prefixes_the_rest() {
        let block = normalize_gherkin(&[
            "Given a user".to_string(),
            "when they log in".to_string(),
            "the dashboard appears".to_string(),
        ]);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "Given a user");
        assert_eq!(lines[1], "When they log in");
        assert_eq!(lines[2], "Then the dashboard appears");
    }

    #[test]
    fn generation_prompt_filters_catalog_to_mentioned_pages() {
        let prompt = build_test_generation_prompt(&story(), None, &registry());
        assert!(prompt.contains("SCRUM-7"));
        assert!(prompt.contains("LoginPage"));
        assert!(!prompt.contains("CheckoutPage"));
        assert!(prompt.contains("OUTPUT FORMAT"));
        assert!(prompt.contains("testid="));
    }

    #[test]
    fn failure_prompt_bounds_html() {
        let huge = "x".repeat(MAX_HTML_BYTES * 2);
        let prompt = build_failure_analysis_prompt(&huge, 3, "testid=login-button", "not found");
        assert!(prompt.len() < MAX_HTML_BYTES + 2048);
        assert!(prompt.contains("FAILING STEP INDEX: 3"));
        assert!(prompt.contains("testid=login-button"));
    }
}
