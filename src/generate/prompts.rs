use crate::annotations::AnnotationKind;
use crate::context::PromptContext;
use crate::heuristics::TriggerReason;

pub const ASSISTANT_SYSTEM: &str = r#"You are a quiet writing companion that lives in the margin of someone's notes.

Your replies appear in a small floating panel next to the text, so:
- Answer in plain prose, two or three short paragraphs at most
- Separate paragraphs with a blank line
- No headings, no code blocks, no preamble like "Great question"
- Stay grounded in the note and any attached context you are given
- If you are unsure, say so briefly instead of guessing

Be warm and direct. The writer is mid-thought; help them keep going."#;

/// Prompt for a question the user just typed.
pub fn question_prompt(question: &str, context: &PromptContext) -> String {
    format!(
        "The writer just typed this question into their note:\n\n{}{}\n\nAnswer it concisely.",
        question.trim(),
        context.to_prompt_section()
    )
}

/// Prompt for a proactive suggestion on the note so far.
pub fn suggestion_prompt(excerpt: &str, reason: TriggerReason, context: &PromptContext) -> String {
    let ask = match reason {
        TriggerReason::HelpSeeking => {
            "The writer sounds uncertain or stuck. Offer one concrete way forward."
        }
        TriggerReason::IncompleteThought => {
            "The writer paused mid-thought. Suggest how the thought might continue, without finishing it for them."
        }
        TriggerReason::CompleteThoughts => {
            "The writer has finished a few thoughts. Offer a short observation that connects or challenges them."
        }
        TriggerReason::Repetition => {
            "The writer seems to be circling the same point. Gently name the repetition and suggest a new angle."
        }
        TriggerReason::Expansion => {
            "This passage could be developed further. Suggest one idea worth expanding on."
        }
    };
    format!(
        "Here is the note so far:\n\n{}{}\n\n{}",
        excerpt.trim(),
        context.to_prompt_section(),
        ask
    )
}

/// Prompt for an AI action requested on selected text.
pub fn action_prompt(kind: AnnotationKind, selection: &str, context: &PromptContext) -> String {
    let ask = match kind {
        AnnotationKind::Definition => {
            "Define this term or phrase in one or two sentences, in the sense it is used here."
        }
        AnnotationKind::Questions => {
            "List three thought-provoking questions this passage raises, one per line."
        }
        AnnotationKind::Swot => {
            "Give a brief SWOT analysis: one line each for strengths, weaknesses, opportunities and threats."
        }
        AnnotationKind::Thought => "Share one thoughtful reflection on this passage.",
        AnnotationKind::Connections => {
            "Name a few ideas, fields or works this passage connects to, and why."
        }
        AnnotationKind::Answer => "Answer the question in this passage concisely.",
    };
    format!(
        "Selected text:\n\n{}{}\n\n{}",
        selection.trim(),
        context.to_prompt_section(),
        ask
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PriorAnswer;

    #[test]
    fn test_question_prompt_includes_context() {
        let context = PromptContext {
            attachments: Vec::new(),
            prior_answers: vec![PriorAnswer {
                question: "What is a borrow?".to_string(),
                answer: "A reference.".to_string(),
            }],
        };
        let prompt = question_prompt("  How do lifetimes work? ", &context);
        assert!(prompt.contains("How do lifetimes work?\n"));
        assert!(prompt.contains("Q: What is a borrow?"));
    }

    #[test]
    fn test_action_prompts_differ_by_kind() {
        let context = PromptContext::default();
        let prompts: Vec<_> = AnnotationKind::selection_actions()
            .iter()
            .map(|kind| action_prompt(*kind, "entropy", &context))
            .collect();
        for (i, a) in prompts.iter().enumerate() {
            assert!(a.starts_with("Selected text:\n\nentropy"));
            for b in &prompts[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_suggestion_prompt_mentions_note() {
        let prompt = suggestion_prompt("My draft.", TriggerReason::Repetition, &PromptContext::default());
        assert!(prompt.contains("My draft."));
        assert!(prompt.contains("repetition"));
    }
}
