//! Coach: decides what the "continue" prompt says when an agent's output
//! is auto-continued rather than delivered.
//!
//! Tiered, and it must never guess: rejection coaching beats a parsed
//! success-criteria quote, which beats a bare file pointer, which beats a
//! detected skill's generic hint, which beats the literal `"continue"`.

use regex::Regex;
use std::sync::OnceLock;

const MAX_CRITERIA_CHARS: usize = 500;

#[derive(Debug, Clone, Copy)]
pub struct SkillDetector {
    pub prefix: &'static str,
    pub phase: &'static str,
    pub evidence_hint: &'static str,
}

pub const SKILL_DETECTORS: &[SkillDetector] = &[
    SkillDetector {
        prefix: "/do-plan",
        phase: "planning",
        evidence_hint: "Confirm the plan document was written and lists concrete success criteria.",
    },
    SkillDetector {
        prefix: "/do-build",
        phase: "build",
        evidence_hint: "Confirm the build succeeded and cite the commit hash or build output.",
    },
    SkillDetector {
        prefix: "/do-test",
        phase: "test",
        evidence_hint: "Confirm tests actually ran and cite the pass/fail counts.",
    },
    SkillDetector {
        prefix: "/do-docs",
        phase: "docs",
        evidence_hint: "Confirm which files were updated and that they reflect the current behavior.",
    },
];

fn success_criteria_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)##\s*Success Criteria\s*\n(.*?)(?:\n##\s|\z)").unwrap()
    })
}

fn extract_success_criteria(plan_contents: &str) -> Option<String> {
    let captures = success_criteria_regex().captures(plan_contents)?;
    let criteria = captures.get(1)?.as_str().trim();
    if criteria.is_empty() {
        None
    } else {
        Some(criteria.to_string())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}

fn detect_skill(message_text: &str) -> Option<&'static SkillDetector> {
    SKILL_DETECTORS.iter().find(|d| message_text.trim_start().starts_with(d.prefix))
}

/// Inputs the coach needs: whatever the worker already has on hand from the
/// classification result and the active plan (if any).
pub struct CoachContext<'a> {
    pub was_rejected_completion: bool,
    pub active_plan_contents: Option<&'a str>,
    pub active_plan_path: Option<&'a str>,
    pub original_message_text: &'a str,
}

/// Builds the continuation prompt. Degrades to the literal `"continue"`
/// whenever it can't confidently do better — never guesses at criteria it
/// can't find.
pub fn build_coaching_message(ctx: &CoachContext) -> String {
    if ctx.was_rejected_completion {
        return rejection_coaching();
    }

    if let Some(contents) = ctx.active_plan_contents {
        if let Some(criteria) = extract_success_criteria(contents) {
            return skill_coaching_with_criteria(&criteria);
        }
        if let Some(path) = ctx.active_plan_path {
            return skill_coaching_with_file_pointer(path);
        }
    }

    if let Some(skill) = detect_skill(ctx.original_message_text) {
        return generic_skill_coaching(skill);
    }

    "continue".to_string()
}

fn rejection_coaching() -> String {
    "That read like a completion claim, but I didn't see concrete evidence (a commit hash, \
     test output, or a changed-file list). Before wrapping up, please confirm the work is \
     actually done and cite what backs that up."
        .to_string()
}

fn skill_coaching_with_criteria(criteria: &str) -> String {
    format!(
        "Please continue, and before finishing confirm these success criteria are met:\n\n{}",
        truncate_chars(criteria, MAX_CRITERIA_CHARS)
    )
}

fn skill_coaching_with_file_pointer(path: &str) -> String {
    format!("Please continue. The active plan at {path} has the success criteria to confirm before finishing.")
}

fn generic_skill_coaching(skill: &SkillDetector) -> String {
    format!("Please continue with the {} phase. {}", skill.phase, skill.evidence_hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_coaching_takes_priority_over_everything_else() {
        let ctx = CoachContext {
            was_rejected_completion: true,
            active_plan_contents: Some("## Success Criteria\n\nAll tests pass.\n"),
            active_plan_path: Some("docs/plans/ACTIVE-foo.md"),
            original_message_text: "/do-build please",
        };
        let message = build_coaching_message(&ctx);
        assert!(message.contains("didn't see concrete evidence"));
    }

    #[test]
    fn quotes_parsed_success_criteria_verbatim() {
        let ctx = CoachContext {
            was_rejected_completion: false,
            active_plan_contents: Some("# Plan\n\n## Success Criteria\n\nAll tests pass.\nNo regressions.\n\n## Implementation Notes\n\nstuff\n"),
            active_plan_path: Some("docs/plans/ACTIVE-foo.md"),
            original_message_text: "do the thing",
        };
        let message = build_coaching_message(&ctx);
        assert!(message.contains("All tests pass."));
        assert!(message.contains("No regressions."));
        assert!(!message.contains("Implementation Notes"));
    }

    #[test]
    fn falls_back_to_file_pointer_when_criteria_unparseable() {
        let ctx = CoachContext {
            was_rejected_completion: false,
            active_plan_contents: Some("# Plan\n\nNo success criteria section here.\n"),
            active_plan_path: Some("docs/plans/ACTIVE-foo.md"),
            original_message_text: "do the thing",
        };
        let message = build_coaching_message(&ctx);
        assert!(message.contains("docs/plans/ACTIVE-foo.md"));
    }

    #[test]
    fn falls_back_to_skill_hint_when_no_plan_present() {
        let ctx = CoachContext {
            was_rejected_completion: false,
            active_plan_contents: None,
            active_plan_path: None,
            original_message_text: "/do-test now please",
        };
        let message = build_coaching_message(&ctx);
        assert!(message.contains("pass/fail counts"));
    }

    #[test]
    fn falls_back_to_plain_continue_when_nothing_else_applies() {
        let ctx = CoachContext {
            was_rejected_completion: false,
            active_plan_contents: None,
            active_plan_path: None,
            original_message_text: "just keep going",
        };
        assert_eq!(build_coaching_message(&ctx), "continue");
    }

    #[test]
    fn long_criteria_is_truncated_at_500_chars() {
        let long_criteria = "a".repeat(600);
        let contents = format!("## Success Criteria\n\n{long_criteria}\n");
        let ctx = CoachContext {
            was_rejected_completion: false,
            active_plan_contents: Some(&contents),
            active_plan_path: Some("docs/plans/ACTIVE-foo.md"),
            original_message_text: "continue",
        };
        let message = build_coaching_message(&ctx);
        assert!(message.len() < 600 + 50);
        assert!(message.contains('…'));
    }
}
