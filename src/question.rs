//! Immediate question detection
//!
//! When the user finishes a line with `?`, the fragment becomes a question
//! candidate, gets tagged as a clickable span and is answered from the cache
//! or by a fresh generation. One question flow runs at a time.
//!
//! `Idle → Candidate → Marking → AnswerPending → AnswerReady | AnswerFailed`

use crate::annotations::AnnotationId;
use crate::editor::{EditorSurface, MarkerId};
use crate::error::MarkingError;
use crate::text::TextEvent;
use std::collections::HashMap;
use std::ops::Range;
use uuid::Uuid;

/// Shortest fragment, including the `?`, that counts as a question.
const MIN_QUESTION_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionPhase {
    Idle,
    Candidate,
    Marking,
    AnswerPending,
    AnswerReady,
    AnswerFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionCandidate {
    pub text: String,
    /// Document range of the question, ending at the cursor
    pub range: Range<usize>,
}

/// A candidate after span tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedQuestion {
    pub flow: u64,
    pub annotation: AnnotationId,
    /// `None` when the editor refused to tag the span
    pub marker: Option<MarkerId>,
    pub question: String,
    pub range: Range<usize>,
}

/// Question candidate in a normalized text event, if the user just closed
/// one with `?`.
pub fn detect_candidate(event: &TextEvent<'_>) -> Option<QuestionCandidate> {
    if event.just_typed() != Some('?') {
        return None;
    }
    let trimmed = event.fragment.trim_start();
    if trimmed.chars().count() < MIN_QUESTION_CHARS || !trimmed.ends_with('?') {
        return None;
    }
    let start = event.line_start + (event.fragment.len() - trimmed.len());
    Some(QuestionCandidate {
        text: trimmed.to_string(),
        range: start..event.cursor,
    })
}

/// Tag `range` without disturbing the user's cursor.
///
/// A cursor at or after the range end keeps its absolute position, one inside
/// the range lands on the range end, one before it stays put.
pub fn mark_preserving_cursor(
    editor: &mut dyn EditorSurface,
    range: Range<usize>,
    marker: MarkerId,
) -> Result<(), MarkingError> {
    let before = editor.selection();
    let result = editor.insert_marked_span(range.clone(), marker);

    if let Some(selection) = before {
        let index = if selection.index > range.start && selection.index < range.end {
            range.end
        } else {
            selection.index
        };
        editor.set_selection(index, selection.length);
    }
    result
}

#[derive(Debug)]
pub struct QuestionTracker {
    phase: QuestionPhase,
    /// Set while a flow is unresolved; a second `?` is ignored meanwhile
    processing: bool,
    active_flow: Option<u64>,
    next_flow: u64,
    /// Tagged spans and the question each one asks
    markers: HashMap<MarkerId, String>,
}

impl Default for QuestionTracker {
    fn default() -> Self {
        Self {
            phase: QuestionPhase::Idle,
            processing: false,
            active_flow: None,
            next_flow: 0,
            markers: HashMap::new(),
        }
    }
}

impl QuestionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> QuestionPhase {
        self.phase
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn active_flow(&self) -> Option<u64> {
        self.active_flow
    }

    /// Start a flow if the event closes a question and none is running.
    pub fn begin(&mut self, event: &TextEvent<'_>) -> Option<QuestionCandidate> {
        let candidate = detect_candidate(event)?;
        if self.processing {
            tracing::debug!(question = %candidate.text, "question flow already running; ignoring");
            return None;
        }
        self.processing = true;
        self.phase = QuestionPhase::Candidate;
        tracing::debug!(question = %candidate.text, "question candidate detected");
        Some(candidate)
    }

    /// Mint ids and tag the candidate's span. A refused tag is logged and the
    /// flow continues without a clickable marker.
    pub fn mark(&mut self, editor: &mut dyn EditorSurface, candidate: QuestionCandidate) -> MarkedQuestion {
        self.phase = QuestionPhase::Marking;
        self.next_flow += 1;
        let flow = self.next_flow;
        self.active_flow = Some(flow);

        let annotation = Uuid::new_v4();
        let marker_id = Uuid::new_v4();
        let marker = match mark_preserving_cursor(editor, candidate.range.clone(), marker_id) {
            Ok(()) => {
                self.markers.insert(marker_id, candidate.text.clone());
                Some(marker_id)
            }
            Err(err) => {
                tracing::warn!(question = %candidate.text, "{}; continuing without a marker", err);
                None
            }
        };

        MarkedQuestion {
            flow,
            annotation,
            marker,
            question: candidate.text,
            range: candidate.range,
        }
    }

    pub fn await_answer(&mut self) {
        self.phase = QuestionPhase::AnswerPending;
    }

    /// Settle the active flow. Returns `false` for a flow that is no longer
    /// active (superseded by a reset).
    pub fn resolve(&mut self, flow: u64, answered: bool) -> bool {
        if self.active_flow != Some(flow) {
            return false;
        }
        self.phase = if answered {
            QuestionPhase::AnswerReady
        } else {
            QuestionPhase::AnswerFailed
        };
        self.processing = false;
        self.active_flow = None;
        true
    }

    /// Question asked by a tagged span.
    pub fn question_for_marker(&self, marker: MarkerId) -> Option<&str> {
        self.markers.get(&marker).map(String::as_str)
    }

    /// Re-enter from a click on a tagged span.
    pub fn reopen(&mut self, marker: MarkerId) -> Option<String> {
        let question = self.markers.get(&marker)?.clone();
        if !self.processing {
            self.phase = QuestionPhase::AnswerReady;
        }
        Some(question)
    }

    pub fn forget_marker(&mut self, marker: MarkerId) {
        self.markers.remove(&marker);
    }

    pub fn reset(&mut self) {
        *self = Self {
            next_flow: self.next_flow,
            ..Self::default()
        };
    }
}
