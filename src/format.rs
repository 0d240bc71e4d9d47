//! Answer presentation
//!
//! Raw model output is normalized into clean paragraphs, long answers are
//! split into two columns, and fresh answers are revealed a few characters
//! at a time. The cache always keeps the raw text; formatting happens on
//! every display.

use crate::config::EngineConfig;
use regex::Regex;
use std::sync::LazyLock;

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").expect("valid blank-line regex"));

/// Split on blank lines, collapse single newlines inside a paragraph to
/// spaces, and rejoin paragraphs with one blank line.
pub fn format_answer(raw: &str) -> String {
    paragraphs(&raw.replace("\r\n", "\n")).join("\n\n")
}

fn paragraphs(text: &str) -> Vec<String> {
    BLANK_LINES
        .split(text)
        .map(|block| {
            block
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|p| !p.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerLayout {
    Single(String),
    Columns { left: String, right: String },
}

impl AnswerLayout {
    pub fn is_columns(&self) -> bool {
        matches!(self, AnswerLayout::Columns { .. })
    }
}

/// Decide between one and two columns for an already formatted answer.
pub fn layout_answer(formatted: &str, config: &EngineConfig) -> AnswerLayout {
    let long = formatted.chars().count() > config.column_split_chars
        || formatted.lines().count() > config.column_split_lines;
    if !long {
        return AnswerLayout::Single(formatted.to_string());
    }

    let paras: Vec<&str> = formatted.split("\n\n").collect();
    let split = if paras.len() > 1 {
        Some(split_paragraphs(&paras))
    } else {
        split_sentences(formatted)
    };

    match split {
        Some((left, right)) => AnswerLayout::Columns { left, right },
        None => AnswerLayout::Single(formatted.to_string()),
    }
}

/// Split at the paragraph boundary closest to the character midpoint.
fn split_paragraphs(paras: &[&str]) -> (String, String) {
    let total: usize = paras.iter().map(|p| p.chars().count()).sum();
    let half = total / 2;

    let mut best = 1;
    let mut best_distance = usize::MAX;
    let mut running = 0;
    for (i, para) in paras.iter().enumerate().take(paras.len() - 1) {
        running += para.chars().count();
        let distance = running.abs_diff(half);
        if distance < best_distance {
            best = i + 1;
            best_distance = distance;
        }
    }

    (paras[..best].join("\n\n"), paras[best..].join("\n\n"))
}

/// Single long paragraph: split at the sentence boundary closest to the middle.
fn split_sentences(text: &str) -> Option<(String, String)> {
    let half = text.len() / 2;
    let mut chars = text.char_indices().peekable();
    let mut best: Option<usize> = None;

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_idx, next)) = chars.peek() {
            if next.is_whitespace() {
                let closer = best.is_none_or(|b| next_idx.abs_diff(half) < b.abs_diff(half));
                if closer {
                    best = Some(next_idx);
                }
            }
        }
    }

    let at = best?;
    let (left, right) = text.split_at(at);
    Some((left.trim_end().to_string(), right.trim_start().to_string()))
}

/// Character-by-character reveal of a fresh answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingReveal {
    text: String,
    /// Byte length of the revealed prefix
    shown: usize,
    chars_per_tick: usize,
}

impl TypingReveal {
    pub fn new(text: impl Into<String>, chars_per_tick: usize) -> Self {
        Self {
            text: text.into(),
            shown: 0,
            chars_per_tick: chars_per_tick.max(1),
        }
    }

    /// Fully revealed from the start, for replays from the cache.
    pub fn instant(text: impl Into<String>) -> Self {
        let text = text.into();
        let shown = text.len();
        Self {
            text,
            shown,
            chars_per_tick: 1,
        }
    }

    pub fn from_config(text: impl Into<String>, config: &EngineConfig) -> Self {
        Self::new(text, config.reveal_chars_per_tick)
    }

    /// Reveal the next few characters. Returns whether the reveal is complete.
    pub fn tick(&mut self) -> bool {
        let rest = &self.text[self.shown..];
        self.shown += match rest.char_indices().nth(self.chars_per_tick) {
            Some((idx, _)) => idx,
            None => rest.len(),
        };
        self.is_complete()
    }

    pub fn visible(&self) -> &str {
        &self.text[..self.shown]
    }

    pub fn full_text(&self) -> &str {
        &self.text
    }

    pub fn is_complete(&self) -> bool {
        self.shown >= self.text.len()
    }

    pub fn finish(&mut self) {
        self.shown = self.text.len();
    }

    pub fn ticks_remaining(&self) -> usize {
        self.text[self.shown..]
            .chars()
            .count()
            .div_ceil(self.chars_per_tick)
    }
}
