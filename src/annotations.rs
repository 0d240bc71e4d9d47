//! Span annotation store
//!
//! Bookkeeping for AI-produced notes attached to text. The store owns no
//! editor state: it maps an annotation id to its anchor text, kind and
//! payload, plus a screen position that is refreshed on demand. Anchor text
//! is advisory and may drift from the live document.

use crate::editor::{EditorSurface, MarkerId};
use crate::error::PositionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type AnnotationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Definition,
    Questions,
    Swot,
    Thought,
    Answer,
    Connections,
}

impl AnnotationKind {
    pub fn label(&self) -> &'static str {
        match self {
            AnnotationKind::Definition => "Definition",
            AnnotationKind::Questions => "Questions",
            AnnotationKind::Swot => "SWOT",
            AnnotationKind::Thought => "Thought",
            AnnotationKind::Answer => "Answer",
            AnnotationKind::Connections => "Connections",
        }
    }

    /// Kinds a user can request on a selection.
    pub fn selection_actions() -> [AnnotationKind; 5] {
        [
            AnnotationKind::Definition,
            AnnotationKind::Questions,
            AnnotationKind::Swot,
            AnnotationKind::Thought,
            AnnotationKind::Connections,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub anchor_text: String,
    pub payload: String,
    /// Screen offset of the anchor, refreshed by [`AnnotationStore::refresh_positions`]
    pub screen_top: f64,
    /// Tagged span in the document, when marking succeeded
    pub marker: Option<MarkerId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct AnnotationStore {
    entries: HashMap<AnnotationId, Annotation>,
    /// Creation order, for stable margin rendering
    order: Vec<AnnotationId>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an annotation under a caller-minted id.
    pub fn insert(
        &mut self,
        id: AnnotationId,
        kind: AnnotationKind,
        anchor_text: impl Into<String>,
        payload: impl Into<String>,
        marker: Option<MarkerId>,
    ) -> &Annotation {
        if !self.entries.contains_key(&id) {
            self.order.push(id);
        }
        self.entries.insert(
            id,
            Annotation {
                id,
                kind,
                anchor_text: anchor_text.into(),
                payload: payload.into(),
                screen_top: 0.0,
                marker,
                created_at: Utc::now(),
            },
        );
        &self.entries[&id]
    }

    pub fn create(
        &mut self,
        kind: AnnotationKind,
        anchor_text: impl Into<String>,
        payload: impl Into<String>,
        marker: Option<MarkerId>,
    ) -> AnnotationId {
        let id = Uuid::new_v4();
        self.insert(id, kind, anchor_text, payload, marker);
        id
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.entries.get(&id)
    }

    pub fn by_marker(&self, marker: MarkerId) -> Option<&Annotation> {
        self.entries.values().find(|a| a.marker == Some(marker))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Explicit user dismissal.
    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let removed = self.entries.remove(&id)?;
        self.order.retain(|other| *other != id);
        Some(removed)
    }

    /// Document reset.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Recompute `screen_top` for every annotation after scroll, resize or
    /// content change. Unresolvable anchors fall back to the top of the
    /// editing surface.
    pub fn refresh_positions(&mut self, editor: &dyn EditorSurface) {
        let fallback = editor.surface_rect().top;
        for annotation in self.entries.values_mut() {
            annotation.screen_top = match locate(annotation, editor) {
                Ok(top) => top,
                Err(err) => {
                    tracing::warn!(annotation = %annotation.id, "{}; using default position", err);
                    fallback
                }
            };
        }
    }

    pub fn screen_top(&self, id: AnnotationId) -> Option<f64> {
        self.entries.get(&id).map(|a| a.screen_top)
    }
}

/// Resolve the screen top of an annotation's anchor.
///
/// A tagged span is authoritative. Without one, the first occurrence of the
/// anchor text is used.
pub fn locate(annotation: &Annotation, editor: &dyn EditorSurface) -> Result<f64, PositionError> {
    let offset = match annotation.marker.and_then(|m| editor.marker_range(m)) {
        Some(range) => range.start,
        None => {
            let anchor = annotation.anchor_text.trim();
            if anchor.is_empty() {
                return Err(PositionError::AnchorNotFound(String::new()));
            }
            editor
                .text()
                .find(anchor)
                .ok_or_else(|| PositionError::AnchorNotFound(anchor.to_string()))?
        }
    };
    editor
        .bounds(offset)
        .map(|b| b.top)
        .ok_or(PositionError::NoBounds(offset))
}
