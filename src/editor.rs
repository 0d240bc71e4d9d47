//! Editor collaborator boundary
//!
//! The engine never owns the document. It reads text, selection and screen
//! bounds through [`EditorSurface`] and asks the surface to tag spans by
//! marker id. The surface keeps the marker → offset-range mapping current as
//! the document changes, so the engine only ever holds ids.
//!
//! Offsets are byte offsets into the UTF-8 text and always fall on character
//! boundaries.

use crate::error::MarkingError;
use crate::panel::Rect;
use crate::text::Edit;
use crate::util::floor_char_boundary;
use std::collections::HashMap;
use std::ops::Range;
use uuid::Uuid;

/// Identifier of a tagged span inside the document.
pub type MarkerId = Uuid;

/// Screen-relative bounds of a document position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub top: f64,
    pub left: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub length: usize,
}

impl Selection {
    pub fn caret(index: usize) -> Self {
        Self { index, length: 0 }
    }

    pub fn end(&self) -> usize {
        self.index + self.length
    }
}

pub trait EditorSurface {
    /// Full plain-text content.
    fn text(&self) -> &str;

    fn selection(&self) -> Option<Selection>;

    /// Screen bounds of the character at `index`, if it is laid out.
    fn bounds(&self, index: usize) -> Option<Bounds>;

    /// Screen rectangle of the editing surface.
    fn surface_rect(&self) -> Rect;

    /// Visually tag `range` so it can be clicked later. Implementations may
    /// move the caret as a side effect; callers restore it.
    fn insert_marked_span(&mut self, range: Range<usize>, marker: MarkerId)
        -> Result<(), MarkingError>;

    /// Current document range of a tagged span.
    fn marker_range(&self, marker: MarkerId) -> Option<Range<usize>>;

    fn remove_marker(&mut self, marker: MarkerId);

    fn set_selection(&mut self, index: usize, length: usize);
}

const DEFAULT_LINE_HEIGHT: f64 = 20.0;
const DEFAULT_CHAR_WIDTH: f64 = 8.0;

/// In-memory editor surface over plain text.
///
/// Lays text out on a fixed grid (one row per line, fixed character width),
/// which is enough to exercise positioning. Re-tagging a span leaves the caret
/// just after the span, the way rich-text surfaces behave when markup is
/// re-inserted.
#[derive(Debug, Clone)]
pub struct PlainTextEditor {
    text: String,
    selection: Option<Selection>,
    markers: HashMap<MarkerId, Range<usize>>,
    rect: Rect,
    line_height: f64,
    char_width: f64,
    scroll_top: f64,
}

impl PlainTextEditor {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let end = text.len();
        Self {
            text,
            selection: Some(Selection::caret(end)),
            markers: HashMap::new(),
            rect: Rect::new(0.0, 0.0, 640.0, 480.0),
            line_height: DEFAULT_LINE_HEIGHT,
            char_width: DEFAULT_CHAR_WIDTH,
            scroll_top: 0.0,
        }
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_line_height(mut self, line_height: f64) -> Self {
        self.line_height = line_height;
        self
    }

    pub fn set_scroll_top(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top.max(0.0);
    }

    pub fn caret(&self) -> usize {
        self.selection.map(|s| s.index).unwrap_or(self.text.len())
    }

    /// Type `s` at the caret, replacing any selected text, and return the
    /// resulting insertion.
    pub fn type_str(&mut self, s: &str) -> Edit {
        if let Some(sel) = self.selection.filter(|sel| sel.length > 0) {
            self.delete(sel.index..sel.end());
        }
        let at = self.caret();
        self.insert(at, s)
    }

    pub fn insert(&mut self, at: usize, s: &str) -> Edit {
        let at = floor_char_boundary(&self.text, at);
        self.text.insert_str(at, s);
        let len = s.len();

        for range in self.markers.values_mut() {
            if at <= range.start {
                range.start += len;
                range.end += len;
            } else if at < range.end {
                range.end += len;
            }
        }

        self.selection = Some(match self.selection {
            Some(sel) if sel.index > at => Selection {
                index: sel.index + len,
                length: sel.length,
            },
            Some(sel) if sel.index == at => Selection::caret(at + len),
            Some(sel) => sel,
            None => Selection::caret(at + len),
        });

        Edit::Insert {
            at,
            text: s.to_string(),
        }
    }

    pub fn delete(&mut self, range: Range<usize>) -> Edit {
        let start = floor_char_boundary(&self.text, range.start);
        let end = floor_char_boundary(&self.text, range.end.max(start));
        self.text.replace_range(start..end, "");
        let len = end - start;

        let shift = |pos: usize| -> usize {
            if pos <= start {
                pos
            } else if pos >= end {
                pos - len
            } else {
                start
            }
        };

        self.markers.retain(|_, r| {
            r.start = shift(r.start);
            r.end = shift(r.end);
            r.start < r.end
        });

        if let Some(sel) = self.selection {
            let index = shift(sel.index);
            let sel_end = shift(sel.end());
            self.selection = Some(Selection {
                index,
                length: sel_end - index,
            });
        }

        Edit::Delete { at: start, len }
    }

    /// Number of tagged spans currently tracked.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }
}

impl EditorSurface for PlainTextEditor {
    fn text(&self) -> &str {
        &self.text
    }

    fn selection(&self) -> Option<Selection> {
        self.selection
    }

    fn bounds(&self, index: usize) -> Option<Bounds> {
        if index > self.text.len() || !self.text.is_char_boundary(index) {
            return None;
        }
        let before = &self.text[..index];
        let line = before.matches('\n').count();
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = self.text[line_start..index].chars().count();
        Some(Bounds {
            top: self.rect.top + line as f64 * self.line_height - self.scroll_top,
            left: self.rect.left + column as f64 * self.char_width,
            height: self.line_height,
        })
    }

    fn surface_rect(&self) -> Rect {
        self.rect
    }

    fn insert_marked_span(
        &mut self,
        range: Range<usize>,
        marker: MarkerId,
    ) -> Result<(), MarkingError> {
        let (start, end) = (range.start, range.end);
        if start >= end || end > self.text.len() {
            return Err(MarkingError::OutOfBounds {
                start,
                end,
                len: self.text.len(),
            });
        }
        if !self.text.is_char_boundary(start) || !self.text.is_char_boundary(end) {
            return Err(MarkingError::NotCharBoundary { start, end });
        }
        if self
            .markers
            .values()
            .any(|r| r.start < end && start < r.end)
        {
            return Err(MarkingError::Overlap { start, end });
        }

        self.markers.insert(marker, range);
        self.selection = Some(Selection::caret(end));
        Ok(())
    }

    fn marker_range(&self, marker: MarkerId) -> Option<Range<usize>> {
        self.markers.get(&marker).cloned()
    }

    fn remove_marker(&mut self, marker: MarkerId) {
        self.markers.remove(&marker);
    }

    fn set_selection(&mut self, index: usize, length: usize) {
        let index = floor_char_boundary(&self.text, index);
        let end = floor_char_boundary(&self.text, index.saturating_add(length));
        self.selection = Some(Selection {
            index,
            length: end - index,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_moves_caret_and_reports_insertions() {
        let mut editor = PlainTextEditor::new("");
        let edit = editor.type_str("Hi");
        assert_eq!(
            edit,
            Edit::Insert {
                at: 0,
                text: "Hi".to_string()
            }
        );
        editor.type_str("?");
        assert_eq!(editor.text(), "Hi?");
        assert_eq!(editor.caret(), 3);
    }

    #[test]
    fn markers_follow_insertions_and_deletions() {
        let mut editor = PlainTextEditor::new("abc why? def");
        let marker = Uuid::new_v4();
        editor.insert_marked_span(4..8, marker).unwrap();

        editor.insert(0, "xx");
        assert_eq!(editor.marker_range(marker), Some(6..10));

        editor.delete(0..2);
        assert_eq!(editor.marker_range(marker), Some(4..8));

        editor.delete(3..9);
        assert_eq!(editor.marker_range(marker), None);
        assert_eq!(editor.marker_count(), 0);
    }

    #[test]
    fn overlapping_marks_are_rejected() {
        let mut editor = PlainTextEditor::new("what is this?");
        editor.insert_marked_span(0..13, Uuid::new_v4()).unwrap();
        let err = editor
            .insert_marked_span(5..9, Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, MarkingError::Overlap { .. }));
    }

    #[test]
    fn bounds_follow_lines_and_scroll() {
        let mut editor = PlainTextEditor::new("one\ntwo\nthree").with_line_height(10.0);
        assert_eq!(editor.bounds(0).unwrap().top, 0.0);
        assert_eq!(editor.bounds(8).unwrap().top, 20.0);
        editor.set_scroll_top(5.0);
        assert_eq!(editor.bounds(8).unwrap().top, 15.0);
        assert!(editor.bounds(100).is_none());
    }
}
