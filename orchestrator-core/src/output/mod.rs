//! Output Pipeline: summarization, classification, coaching and the
//! auto-continue decision that ties them together.

pub mod artifacts;
pub mod classifier;
pub mod coach;
pub mod summarizer;

pub use artifacts::Artifacts;
pub use classifier::{ClassificationResult, ClassifierClient, OutputType};
pub use coach::{build_coaching_message, CoachContext};
pub use summarizer::{summarize_response, SummarizedResponse, SummarizerClient};

/// What the worker should do with an agent's terminal output, decided by
/// the three-way auto-continue rule below.
#[derive(Debug, Clone)]
pub enum AutoContinueDecision {
    /// Deliver to the user; apply the summarized text, set a reaction, and
    /// attach the full-output file if one was written.
    Deliver {
        text: String,
        file_attachment: Option<std::path::PathBuf>,
    },
    /// Push a continuation job instead of delivering. The reaction is
    /// deferred — the worker must not set one for this step.
    AutoContinue { coached_prompt: String, next_count: u32 },
}

/// Decide whether to deliver or auto-continue:
/// 1. ERROR never auto-continues.
/// 2. STATUS_UPDATE auto-continues while under the cap.
/// 3. Everything else (including a capped-out STATUS_UPDATE) delivers.
pub fn decide_auto_continue(
    classification: &ClassificationResult,
    summarized: &SummarizedResponse,
    auto_continue_count: u32,
    max_auto_continues: u32,
    coach_ctx: &CoachContext,
) -> AutoContinueDecision {
    if matches!(classification.output_type, OutputType::Error) {
        return AutoContinueDecision::Deliver {
            text: summarized.text.clone(),
            file_attachment: summarized.full_output_path.clone(),
        };
    }

    if matches!(classification.output_type, OutputType::StatusUpdate)
        && auto_continue_count < max_auto_continues
    {
        return AutoContinueDecision::AutoContinue {
            coached_prompt: build_coaching_message(coach_ctx),
            next_count: auto_continue_count + 1,
        };
    }

    AutoContinueDecision::Deliver {
        text: summarized.text.clone(),
        file_attachment: summarized.full_output_path.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(output_type: OutputType) -> ClassificationResult {
        ClassificationResult {
            output_type,
            confidence: 0.9,
            reason: "test".to_string(),
            was_rejected_completion: false,
        }
    }

    fn summarized(text: &str) -> SummarizedResponse {
        SummarizedResponse {
            text: text.to_string(),
            was_summarized: false,
            full_output_path: None,
            artifacts: Artifacts::default(),
        }
    }

    fn coach_ctx<'a>(message: &'a str) -> CoachContext<'a> {
        CoachContext {
            was_rejected_completion: false,
            active_plan_contents: None,
            active_plan_path: None,
            original_message_text: message,
        }
    }

    #[test]
    fn error_output_never_auto_continues() {
        let decision = decide_auto_continue(
            &classification(OutputType::Error),
            &summarized("boom"),
            0,
            3,
            &coach_ctx("continue"),
        );
        assert!(matches!(decision, AutoContinueDecision::Deliver { .. }));
    }

    #[test]
    fn status_update_under_cap_auto_continues() {
        let decision = decide_auto_continue(
            &classification(OutputType::StatusUpdate),
            &summarized("still working"),
            1,
            3,
            &coach_ctx("continue"),
        );
        match decision {
            AutoContinueDecision::AutoContinue { next_count, .. } => assert_eq!(next_count, 2),
            _ => panic!("expected auto-continue"),
        }
    }

    #[test]
    fn status_update_at_cap_delivers_instead() {
        let decision = decide_auto_continue(
            &classification(OutputType::StatusUpdate),
            &summarized("still working"),
            3,
            3,
            &coach_ctx("continue"),
        );
        assert!(matches!(decision, AutoContinueDecision::Deliver { .. }));
    }

    #[test]
    fn completion_always_delivers() {
        let decision = decide_auto_continue(
            &classification(OutputType::Completion),
            &summarized("all done"),
            0,
            3,
            &coach_ctx("continue"),
        );
        assert!(matches!(decision, AutoContinueDecision::Deliver { .. }));
    }
}
