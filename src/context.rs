//! Prompt context assembly
//!
//! Gathers what a prompt may carry beyond the user's own text: attachment
//! context supplied by the host (transcripts, scraped pages) and earlier Q&A
//! pairs from this session that look related to the current query.

use crate::cache::{normalize_question, AnswerCache, CachedAnswer};
use crate::config::EngineConfig;
use crate::heuristics::content_words;
use crate::util::truncate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Speech-to-text output of an audio or video attachment
    Transcript,
    /// Readable text extracted from a linked web page
    ScrapedPage,
}

impl AttachmentKind {
    pub fn label(&self) -> &'static str {
        match self {
            AttachmentKind::Transcript => "Transcript",
            AttachmentKind::ScrapedPage => "Web page",
        }
    }
}

/// Opaque attachment text handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub kind: AttachmentKind,
    pub text: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, kind: AttachmentKind, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            text: text.into(),
        }
    }
}

/// Host collaborator that knows which attachments belong to the open note.
pub trait AttachmentSource: Send + Sync {
    fn attachments(&self) -> Vec<Attachment>;
}

/// Fixed attachment list, for hosts that load everything up front.
#[derive(Debug, Clone, Default)]
pub struct StaticAttachments(pub Vec<Attachment>);

impl AttachmentSource for StaticAttachments {
    fn attachments(&self) -> Vec<Attachment> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorAnswer {
    pub question: String,
    pub answer: String,
}

/// Everything folded into a prompt besides the query itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub attachments: Vec<Attachment>,
    pub prior_answers: Vec<PriorAnswer>,
}

impl PromptContext {
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.prior_answers.is_empty()
    }

    /// Build the context for `query`. Attachment text is cut to the configured
    /// budget; related answers come from the session cache.
    pub fn assemble(
        query: &str,
        source: Option<&dyn AttachmentSource>,
        cache: &AnswerCache,
        config: &EngineConfig,
    ) -> Self {
        let attachments = source
            .map(|s| s.attachments())
            .unwrap_or_default()
            .into_iter()
            .filter(|a| !a.text.trim().is_empty())
            .map(|a| Attachment {
                text: truncate(a.text.trim(), config.attachment_budget_chars),
                ..a
            })
            .collect();

        let prior_answers = matching_answers(query, &cache.entries(), config.prior_answers_limit);

        Self {
            attachments,
            prior_answers,
        }
    }

    /// Render as a prompt section. Empty context renders as an empty string.
    pub fn to_prompt_section(&self) -> String {
        let mut out = String::new();
        if !self.attachments.is_empty() {
            out.push_str("\n\nATTACHED CONTEXT:");
            for attachment in &self.attachments {
                out.push_str(&format!(
                    "\n[{}: {}]\n{}",
                    attachment.kind.label(),
                    attachment.name,
                    attachment.text
                ));
            }
        }
        if !self.prior_answers.is_empty() {
            out.push_str("\n\nEARLIER IN THIS NOTE:");
            for prior in &self.prior_answers {
                out.push_str(&format!("\nQ: {}\nA: {}", prior.question, prior.answer));
            }
        }
        out
    }
}

/// Cached Q&A pairs sharing content words with `query`, best match first.
///
/// The query's own cache entry is never included.
pub fn matching_answers(query: &str, entries: &[CachedAnswer], limit: usize) -> Vec<PriorAnswer> {
    let key = normalize_question(query);
    let wanted = content_words(query);
    if wanted.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &CachedAnswer)> = entries
        .iter()
        .filter(|entry| normalize_question(&entry.question) != key)
        .map(|entry| {
            let overlap = content_words(&entry.question)
                .intersection(&wanted)
                .count();
            (overlap, entry)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .collect();

    // Stronger overlap first, then the most recent answer.
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.generated_at.cmp(&a.1.generated_at))
    });

    scored
        .into_iter()
        .take(limit)
        .map(|(_, entry)| PriorAnswer {
            question: entry.question.clone(),
            answer: entry.answer.clone(),
        })
        .collect()
}
