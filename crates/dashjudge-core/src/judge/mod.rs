pub mod parse;

use crate::model::{
    PromptRole, PromptTemplate, EXPECTED_JSON_VAR, GENERATED_JSON_VAR, USER_PROMPT_VAR,
};
use serde_json::Value;

pub use parse::{parse_judge_response, JudgeVerdict};

pub const DEFAULT_JUDGE_PROMPT_ID: &str = "judge-default";

pub const DEFAULT_JUDGE_TEMPLATE: &str = r#"You are reviewing a generated dashboard configuration against a reference configuration.

User request:
{{user_prompt}}

Reference configuration:
{{expected_json}}

Generated configuration:
{{generated_json}}

Compare layer kinds, weather models, color maps, styling and layout. Rate how well the generated
configuration fulfils the request compared with the reference, from 1 (unrelated) to 10
(equivalent).

Answer exactly in this form:
<score>N</score>
<details>What differs and why it matters.</details>"#;

pub fn default_judge_template() -> PromptTemplate {
    PromptTemplate {
        id: DEFAULT_JUDGE_PROMPT_ID.to_string(),
        version: 1,
        role: PromptRole::Judge,
        template: DEFAULT_JUDGE_TEMPLATE.to_string(),
    }
}

/// Renders the judge prompt. Both documents are pretty-printed so the judge sees stable
/// indentation regardless of how the generator formatted its output.
pub fn render_judge_prompt(
    template: &PromptTemplate,
    user_prompt: &str,
    expected: &Value,
    generated: &Value,
) -> String {
    let expected = pretty(expected);
    let generated = pretty(generated);
    template.render(&[
        (USER_PROMPT_VAR, user_prompt),
        (EXPECTED_JSON_VAR, &expected),
        (GENERATED_JSON_VAR, &generated),
    ])
}

fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_template_has_all_placeholders() {
        assert!(default_judge_template().missing_vars().is_empty());
    }

    #[test]
    fn test_render_pretty_prints_documents() {
        let prompt = render_judge_prompt(
            &default_judge_template(),
            "temperature over Europe",
            &json!({"tabs": []}),
            &json!({"tabs": [{"maps": []}]}),
        );
        assert!(prompt.contains("temperature over Europe"));
        assert!(prompt.contains("{\n  \"tabs\": []\n}"));
        assert!(prompt.contains("\"maps\": []"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_placeholder_in_user_prompt_is_kept_verbatim() {
        let prompt = render_judge_prompt(
            &default_judge_template(),
            "show {{generated_json}} here",
            &json!({"ref": 1}),
            &json!({"gen": 2}),
        );
        assert!(prompt.contains("User request:\nshow {{generated_json}} here\n"));
        assert_eq!(prompt.matches("\"gen\": 2").count(), 1);
        assert_eq!(prompt.matches("\"ref\": 1").count(), 1);
    }
}
