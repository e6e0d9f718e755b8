//! Prompt templates.
//!
//! Every template opens with a `Task:` line naming what it asks for. The
//! line doubles as a routing key for scripted oracles in tests.

pub const WIDE_REVIEW: &str = include_str!("prompts/wide_review.txt");
pub const NARROW_REVIEW: &str = include_str!("prompts/narrow_review.txt");
pub const LENS_QUESTION: &str = include_str!("prompts/lens_question.txt");
pub const LENS_SYNTHESIS: &str = include_str!("prompts/lens_synthesis.txt");
pub const CONTINUITY_EXTRACT: &str = include_str!("prompts/continuity_extract.txt");
pub const CONTINUITY_PATCH: &str = include_str!("prompts/continuity_patch.txt");
pub const RELATIONSHIPS: &str = include_str!("prompts/relationships.txt");
pub const REFINE_GENERATE: &str = include_str!("prompts/refine_generate.txt");
pub const REFINE_CRITIQUE: &str = include_str!("prompts/refine_critique.txt");
pub const REFINE_REVISE: &str = include_str!("prompts/refine_revise.txt");

/// The `Task:` line of each template.
pub mod task {
    pub const WIDE_REVIEW: &str = "Task: wide-review";
    pub const NARROW_REVIEW: &str = "Task: narrow-review";
    pub const LENS_QUESTION: &str = "Task: lens-question";
    pub const LENS_SYNTHESIS: &str = "Task: lens-synthesis";
    pub const CONTINUITY_EXTRACT: &str = "Task: continuity-extract";
    pub const CONTINUITY_PATCH: &str = "Task: continuity-patch";
    pub const RELATIONSHIPS: &str = "Task: tag-relationships";
    pub const REFINE_GENERATE: &str = "Task: refine-generate";
    pub const REFINE_CRITIQUE: &str = "Task: refine-critique";
    pub const REFINE_REVISE: &str = "Task: refine-revise";
}

/// Fill `{{name}}` placeholders in one pass.
///
/// Substituted values are never rescanned, so text that happens to contain
/// `{{...}}` passes through untouched. Unknown placeholders are left as is.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let name = &after[..close];
                match values.iter().find(|(key, _)| *key == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_once() {
        let out = render("A {{x}} and {{y}} {{z}}", &[("x", "{{y}}"), ("y", "two")]);
        assert_eq!(out, "A {{y}} and two {{z}}");
    }

    #[test]
    fn test_render_handles_unterminated_placeholder() {
        assert_eq!(render("tail {{oops", &[]), "tail {{oops");
    }

    #[test]
    fn test_templates_start_with_task_line() {
        let pairs = [
            (WIDE_REVIEW, task::WIDE_REVIEW),
            (NARROW_REVIEW, task::NARROW_REVIEW),
            (LENS_QUESTION, task::LENS_QUESTION),
            (LENS_SYNTHESIS, task::LENS_SYNTHESIS),
            (CONTINUITY_EXTRACT, task::CONTINUITY_EXTRACT),
            (CONTINUITY_PATCH, task::CONTINUITY_PATCH),
            (RELATIONSHIPS, task::RELATIONSHIPS),
            (REFINE_GENERATE, task::REFINE_GENERATE),
            (REFINE_CRITIQUE, task::REFINE_CRITIQUE),
            (REFINE_REVISE, task::REFINE_REVISE),
        ];
        for (template, task_line) in pairs {
            assert!(template.starts_with(task_line), "{task_line}");
        }
    }
}
