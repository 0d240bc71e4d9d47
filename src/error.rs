//! Error taxonomy for the assistance engine
//!
//! None of these errors are fatal to the editing session. Each one degrades to
//! "no annotation shown" or "default position", never to blocked input.

use thiserror::Error;

/// Failure from the generation collaborator (transport or upstream).
///
/// Cloneable so a single in-flight request can hand the same failure to every
/// caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generation failed: {message}")]
pub struct GenerationError {
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Screen bounds for an annotation could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("no bounds for document offset {0}")]
    NoBounds(usize),
    #[error("anchor text not found in document: {0:?}")]
    AnchorNotFound(String),
}

/// The editor refused to tag a span.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkingError {
    #[error("range {start}..{end} is outside a document of length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("range {start}..{end} does not fall on character boundaries")]
    NotCharBoundary { start: usize, end: usize },
    #[error("range {start}..{end} overlaps an existing marked span")]
    Overlap { start: usize, end: usize },
}
