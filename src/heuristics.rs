//! Trigger heuristics for proactive suggestions
//!
//! Pure, rule-based decisions over the note text, idle time and the
//! scheduler's [`TriggerState`]. Only interrupt when there is a plausible
//! signal that help adds value, and scale the required idle time to how
//! strong that signal is.
//!
//! Layers, all of which must pass:
//! 1. maturity (enough words and sentences)
//! 2. idle guard (never while typing)
//! 3. cooldown since the last suggestion
//! 4. not mid-sentence, unless an intent signal is present
//! 5. at least one value condition, each with its own idle floor
//! 6. not already polished prose
//! 7. content changed since the last analysis
//!
//! Only text before the cursor is evaluated.

use crate::config::EngineConfig;
use crate::scheduler::TriggerState;
use crate::util::{floor_char_boundary, hash_str, prefix_chars, suffix_chars};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s|$)").expect("valid sentence regex"));

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid paragraph regex"));

static HELP_SEEKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:i'm stuck|im stuck|i am stuck|stuck on|not sure|unsure|how do i|how can i|how should i|what if|maybe|perhaps|i think|i wonder|i don't know|i dont know|no idea|confused|any ideas|help me)\b",
    )
    .expect("valid help-seeking regex")
});

static INCOMPLETE_THOUGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:but|however),?\s+[\w'-]+|\b(?:and|or))$")
        .expect("valid incomplete-thought regex")
});

/// Polished prose: average sentence length above this suppresses triggers.
const TOO_COMPLETE_AVG_WORDS: f64 = 25.0;
const TOO_COMPLETE_MIN_SENTENCES: usize = 5;

const COMPLETE_THOUGHTS_MIN_SENTENCES: usize = 3;
const REPETITION_WINDOW: usize = 4;
const REPETITION_SHARED_WORDS: usize = 4;
const REPETITION_OVERLAP: f64 = 0.3;
const EXPANSION_SENTENCES: (usize, usize) = (2, 6);
const EXPANSION_WORDS: (usize, usize) = (30, 250);

/// Why a proactive suggestion fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerReason {
    /// Help-seeking or uncertain phrasing
    HelpSeeking,
    /// Dangling connective at the cursor
    IncompleteThought,
    /// Several finished sentences across paragraphs
    CompleteThoughts,
    /// Recent sentences say the same thing
    Repetition,
    /// Short, finished passage that could be developed
    Expansion,
}

impl TriggerReason {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerReason::HelpSeeking => "help-seeking",
            TriggerReason::IncompleteThought => "incomplete thought",
            TriggerReason::CompleteThoughts => "complete thoughts",
            TriggerReason::Repetition => "repetition",
            TriggerReason::Expansion => "expansion opportunity",
        }
    }

    /// Idle time required before this signal may fire.
    pub fn min_idle(&self, config: &EngineConfig) -> Duration {
        let ms = match self {
            TriggerReason::HelpSeeking => config.help_seeking_idle_ms,
            TriggerReason::IncompleteThought => config.incomplete_thought_idle_ms,
            TriggerReason::CompleteThoughts => config.complete_thoughts_idle_ms,
            TriggerReason::Repetition => config.repetition_idle_ms,
            TriggerReason::Expansion => config.expansion_idle_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Below the word or sentence floor
    Immature,
    /// User typed too recently
    Typing,
    CoolingDown,
    MidSentence,
    /// Prose already looks finished
    TooComplete,
    /// Same content as the last analysis
    AlreadyAnalyzed,
    NoSignal,
    /// A signal is present but its idle floor is not reached yet
    WaitingForIdle(TriggerReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Trigger(TriggerReason),
    Skip(SkipReason),
}

impl Decision {
    pub fn is_trigger(&self) -> bool {
        matches!(self, Decision::Trigger(_))
    }
}

/// Structural facts about the evaluated text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextAnalysis {
    pub word_count: usize,
    pub sentence_count: usize,
    pub has_paragraph_break: bool,
    pub ends_with_terminal: bool,
    pub help_seeking: bool,
    pub incomplete_thought: bool,
    pub repetition: bool,
    pub avg_sentence_words: f64,
    pub fingerprint: u64,
}

impl TextAnalysis {
    /// Intent signals allow a trigger even mid-sentence.
    pub fn has_intent_signal(&self) -> bool {
        self.help_seeking || self.incomplete_thought
    }

    pub fn is_mature(&self, config: &EngineConfig) -> bool {
        self.word_count >= config.min_words && self.sentence_count >= config.min_sentences
    }

    pub fn is_too_complete(&self) -> bool {
        self.avg_sentence_words > TOO_COMPLETE_AVG_WORDS
            && self.sentence_count >= TOO_COMPLETE_MIN_SENTENCES
            && self.has_paragraph_break
    }

    pub fn is_complete_thoughts(&self) -> bool {
        self.sentence_count >= COMPLETE_THOUGHTS_MIN_SENTENCES
            && self.has_paragraph_break
            && self.ends_with_terminal
    }

    pub fn is_expansion_opportunity(&self) -> bool {
        let (min_s, max_s) = EXPANSION_SENTENCES;
        let (min_w, max_w) = EXPANSION_WORDS;
        (min_s..=max_s).contains(&self.sentence_count)
            && (min_w..=max_w).contains(&self.word_count)
            && (self.has_paragraph_break || self.sentence_count > 1)
            && self.ends_with_terminal
    }

    /// Value conditions present, in ascending order of required idle time.
    pub fn signals(&self) -> Vec<TriggerReason> {
        let mut signals = Vec::new();
        if self.help_seeking {
            signals.push(TriggerReason::HelpSeeking);
        }
        if self.incomplete_thought {
            signals.push(TriggerReason::IncompleteThought);
        }
        if self.is_complete_thoughts() {
            signals.push(TriggerReason::CompleteThoughts);
        }
        if self.repetition {
            signals.push(TriggerReason::Repetition);
        }
        if self.is_expansion_opportunity() {
            signals.push(TriggerReason::Expansion);
        }
        signals
    }
}

/// Text the heuristics look at: everything before the cursor.
pub fn evaluated_text(text: &str, cursor: usize) -> &str {
    &text[..floor_char_boundary(text, cursor)]
}

/// Fingerprint used for de-duplication across analyses.
pub fn content_fingerprint(text: &str, config: &EngineConfig) -> u64 {
    hash_str(prefix_chars(text, config.fingerprint_chars))
}

/// Sentences terminated by `.`, `!` or `?` followed by whitespace or the end
/// of the text. An unterminated trailing fragment is not a sentence.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[start..m.end()].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = m.end();
    }
    out
}

/// Lowercased words longer than three characters.
pub fn content_words(text: &str) -> HashSet<String> {
    tokens(text).into_iter().filter(|w| w.chars().count() > 3).collect()
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn ends_with_terminal(text: &str) -> bool {
    let trimmed = text
        .trim_end()
        .trim_end_matches(|c: char| matches!(c, '"' | '\'' | ')' | ']' | '”' | '’'));
    trimmed.ends_with(['.', '!', '?'])
}

/// Two of the last few sentences repeat each other.
pub fn detect_repetition(sentences: &[&str]) -> bool {
    let recent = &sentences[sentences.len().saturating_sub(REPETITION_WINDOW)..];
    let token_sets: Vec<HashSet<String>> = recent.iter().map(|s| tokens(s)).collect();

    for i in 0..token_sets.len() {
        for j in (i + 1)..token_sets.len() {
            let (a, b) = (&token_sets[i], &token_sets[j]);
            let shared_content = a
                .intersection(b)
                .filter(|w| w.chars().count() > 3)
                .count();
            if shared_content >= REPETITION_SHARED_WORDS {
                return true;
            }
            let union = a.union(b).count();
            if union > 0 {
                let overlap = a.intersection(b).count() as f64 / union as f64;
                if overlap >= REPETITION_OVERLAP {
                    return true;
                }
            }
        }
    }
    false
}

/// Compute every structural fact the policy needs.
pub fn analyze(text: &str, cursor: usize, config: &EngineConfig) -> TextAnalysis {
    let head = evaluated_text(text, cursor);
    let sentences = sentences(head);
    let word_count = head.split_whitespace().count();
    let sentence_count = sentences.len();

    let window = suffix_chars(head, config.keyword_window_chars).replace('’', "'");
    let sentence_words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();

    TextAnalysis {
        word_count,
        sentence_count,
        has_paragraph_break: PARAGRAPH_BREAK.is_match(head),
        ends_with_terminal: ends_with_terminal(head),
        help_seeking: HELP_SEEKING.is_match(&window),
        incomplete_thought: INCOMPLETE_THOUGHT.is_match(head.trim_end()),
        repetition: detect_repetition(&sentences),
        avg_sentence_words: if sentence_count == 0 {
            0.0
        } else {
            sentence_words as f64 / sentence_count as f64
        },
        fingerprint: content_fingerprint(head, config),
    }
}

/// Full decision with the reason it was reached.
pub fn evaluate(
    text: &str,
    cursor: usize,
    state: &TriggerState,
    now: Instant,
    config: &EngineConfig,
) -> Decision {
    let idle = state.idle_for(now);
    if idle < Duration::from_millis(config.idle_guard_ms) {
        return Decision::Skip(SkipReason::Typing);
    }

    if let Some(since) = state.since_last_suggestion(now) {
        if since < Duration::from_millis(config.cooldown_ms) {
            return Decision::Skip(SkipReason::CoolingDown);
        }
    }

    let analysis = analyze(text, cursor, config);
    decide(&analysis, state, idle, config)
}

/// Apply the policy layers to an already computed analysis.
pub fn decide(
    analysis: &TextAnalysis,
    state: &TriggerState,
    idle: Duration,
    config: &EngineConfig,
) -> Decision {
    if !analysis.is_mature(config) {
        return Decision::Skip(SkipReason::Immature);
    }
    if analysis.is_too_complete() {
        return Decision::Skip(SkipReason::TooComplete);
    }
    if state.last_analyzed_hash() == Some(analysis.fingerprint) {
        return Decision::Skip(SkipReason::AlreadyAnalyzed);
    }
    if !analysis.ends_with_terminal && !analysis.has_intent_signal() {
        return Decision::Skip(SkipReason::MidSentence);
    }

    let signals = analysis.signals();
    match signals.iter().find(|reason| idle >= reason.min_idle(config)) {
        Some(reason) => Decision::Trigger(*reason),
        None => match signals.first() {
            Some(reason) => Decision::Skip(SkipReason::WaitingForIdle(*reason)),
            None => Decision::Skip(SkipReason::NoSignal),
        },
    }
}

/// Whether a proactive suggestion should fire now.
pub fn should_trigger(
    text: &str,
    cursor: usize,
    state: &TriggerState,
    now: Instant,
    config: &EngineConfig,
) -> bool {
    evaluate(text, cursor, state, now, config).is_trigger()
}
