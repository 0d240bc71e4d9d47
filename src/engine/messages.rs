use crate::annotations::AnnotationId;
use crate::cache::Answer;
use crate::error::GenerationError;

/// Messages from timer and generation tasks back to the engine.
///
/// Every message carries the id of the loop, flow or suggestion that
/// spawned it, so results that arrive after a restart or reset are ignored.
#[derive(Debug)]
pub enum EngineMessage {
    /// One heuristic check of a polling loop is due
    PollTick { loop_id: u64 },
    /// Proactive suggestion text came back
    SuggestionReady {
        suggestion: u64,
        result: Result<String, GenerationError>,
    },
    /// Indicator went untouched long enough to open by itself
    AutoExpand { suggestion: u64 },
    /// Answer for a detected question
    AnswerReady {
        flow: u64,
        result: Result<Answer, GenerationError>,
    },
    /// Result of an AI action on selected text
    ActionReady {
        annotation: AnnotationId,
        session: u64,
        result: Result<Answer, GenerationError>,
    },
    /// A background task panicked
    TaskCrashed { task: &'static str, detail: String },
}
