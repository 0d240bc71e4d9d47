//! Text event normalization
//!
//! Turns a raw editor change into the canonical view the engine reasons
//! about: the character before the cursor, the line fragment ending at the
//! cursor, and whether the change was an insertion. Work is bounded by the
//! length of the current line, never the whole document.

use crate::util::floor_char_boundary;

/// Delta of the most recent edit, in byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Insert { at: usize, text: String },
    Delete { at: usize, len: usize },
}

impl Edit {
    pub fn is_insertion(&self) -> bool {
        matches!(self, Edit::Insert { .. })
    }

    pub fn inserted(&self) -> Option<&str> {
        match self {
            Edit::Insert { text, .. } => Some(text.as_str()),
            Edit::Delete { .. } => None,
        }
    }
}

/// Normalized view of one text change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEvent<'a> {
    /// Cursor byte offset, clamped to a char boundary.
    pub cursor: usize,
    /// Character immediately before the cursor.
    pub prev_char: Option<char>,
    /// Byte offset where the cursor's line begins.
    pub line_start: usize,
    /// Text from the line start up to the cursor.
    pub fragment: &'a str,
    /// Text inserted by the edit, if it was an insertion.
    pub inserted: Option<&'a str>,
}

impl TextEvent<'_> {
    pub fn is_insertion(&self) -> bool {
        self.inserted.is_some()
    }

    /// The character the user just typed, when the edit was a single
    /// keystroke that landed right before the cursor.
    pub fn just_typed(&self) -> Option<char> {
        let inserted = self.inserted?;
        let mut chars = inserted.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        (self.prev_char == Some(c)).then_some(c)
    }
}

/// Normalize an editor change.
pub fn normalize<'a>(text: &'a str, cursor: usize, edit: &'a Edit) -> TextEvent<'a> {
    let cursor = floor_char_boundary(text, cursor);
    let before = &text[..cursor];
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let fragment = &text[line_start..cursor];

    TextEvent {
        cursor,
        prev_char: fragment.chars().next_back(),
        line_start,
        fragment,
        inserted: edit.inserted(),
    }
}
