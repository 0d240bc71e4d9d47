//! The inline assistance engine
//!
//! [`InlineAssistant`] is the single owner of one document's assistance
//! state: answer cache, annotations, question flow, suggestion scheduler and
//! the open floating panel. The host forwards editor changes and pointer
//! events; timer and generation tasks report back through an internal
//! channel that the host drains on its UI loop (or awaits in tests).
//!
//! Nothing here blocks the editor. Generation failures, unpositionable
//! anchors and refused span tags all degrade inline.

pub(crate) mod background;
pub mod messages;

pub use messages::EngineMessage;

use crate::annotations::{self, AnnotationId, AnnotationKind, AnnotationStore};
use crate::cache::{Answer, AnswerCache, AnswerOrigin, AnswerRequest};
use crate::config::EngineConfig;
use crate::context::{AttachmentSource, PromptContext};
use crate::editor::{EditorSurface, MarkerId};
use crate::error::{GenerationError, PositionError};
use crate::format::{format_answer, layout_answer, AnswerLayout, TypingReveal};
use crate::generate::prompts::{action_prompt, question_prompt, suggestion_prompt};
use crate::generate::Generator;
use crate::heuristics::{self, TriggerReason};
use crate::panel::{ClickOutcome, FloatingPanel, PanelAnchor, PanelLayout, PanelTarget, Point, Rect};
use crate::question::{mark_preserving_cursor, MarkedQuestion, QuestionCandidate, QuestionTracker};
use crate::scheduler::{PollOutcome, SuggestionScheduler};
use crate::text::{normalize, Edit};
use crate::util::{floor_char_boundary, suffix_chars};
use background::spawn_background;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use uuid::Uuid;

const QUESTION_TASK: &str = "question_answer";
const ACTION_TASK: &str = "selection_action";

/// Something the host may want to render or report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    QuestionDetected {
        annotation: AnnotationId,
        question: String,
    },
    AnswerShown {
        annotation: AnnotationId,
        origin: AnswerOrigin,
    },
    AnswerFailed {
        annotation: AnnotationId,
        question: String,
    },
    SuggestionTriggered {
        reason: TriggerReason,
    },
    SuggestionIndicator {
        suggestion: u64,
    },
    SuggestionExpanded {
        suggestion: u64,
    },
    ActionRequested {
        annotation: AnnotationId,
        kind: AnnotationKind,
    },
    ActionShown {
        annotation: AnnotationId,
        kind: AnnotationKind,
        origin: AnswerOrigin,
    },
    ActionFailed {
        annotation: AnnotationId,
        kind: AnnotationKind,
    },
    PanelClosed {
        annotation: AnnotationId,
    },
}

/// Content of the open floating panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerView {
    pub annotation: AnnotationId,
    pub kind: AnnotationKind,
    /// Question or selected text the panel belongs to
    pub anchor_text: String,
    pub layout: AnswerLayout,
    pub reveal: TypingReveal,
    pub failed: bool,
}

#[derive(Debug, Clone)]
struct PendingAction {
    kind: AnnotationKind,
    anchor_text: String,
    offset: usize,
    marker: Option<MarkerId>,
}

/// Margin button for one annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginButton {
    pub annotation: AnnotationId,
    pub kind: AnnotationKind,
    pub top: f64,
}

pub struct InlineAssistant {
    config: EngineConfig,
    generator: Arc<dyn Generator>,
    attachments: Option<Arc<dyn AttachmentSource>>,
    cache: AnswerCache,
    annotations: AnnotationStore,
    questions: QuestionTracker,
    scheduler: SuggestionScheduler,
    layout: PanelLayout,
    panel: Option<FloatingPanel>,
    view: Option<AnswerView>,
    pending_question: Option<MarkedQuestion>,
    pending_actions: HashMap<AnnotationId, PendingAction>,
    /// Bumped on reset so results for the previous note are ignored
    session: u64,
    tx: UnboundedSender<EngineMessage>,
    rx: UnboundedReceiver<EngineMessage>,
}

impl InlineAssistant {
    pub fn new(config: EngineConfig, generator: Arc<dyn Generator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            layout: PanelLayout::from_config(&config),
            scheduler: SuggestionScheduler::new(config.clone(), tx.clone()),
            config,
            generator,
            attachments: None,
            cache: AnswerCache::new(),
            annotations: AnnotationStore::new(),
            questions: QuestionTracker::new(),
            panel: None,
            view: None,
            pending_question: None,
            pending_actions: HashMap::new(),
            session: 0,
            tx,
            rx,
        }
    }

    pub fn with_attachments(mut self, source: Arc<dyn AttachmentSource>) -> Self {
        self.attachments = Some(source);
        self
    }

    pub fn with_viewport(mut self, viewport: Rect) -> Self {
        self.layout = self.layout.with_viewport(viewport);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.annotations
    }

    pub fn questions(&self) -> &QuestionTracker {
        &self.questions
    }

    pub fn scheduler(&self) -> &SuggestionScheduler {
        &self.scheduler
    }

    pub fn panel(&self) -> Option<&FloatingPanel> {
        self.panel.as_ref()
    }

    pub fn view(&self) -> Option<&AnswerView> {
        self.view.as_ref()
    }

    /// Screen frame of the open panel.
    pub fn panel_frame(&self, editor: &dyn EditorSurface) -> Option<Rect> {
        self.panel
            .as_ref()
            .map(|p| p.frame(&self.layout, editor.surface_rect()))
    }

    /// Screen frame of the suggestion indicator or its expanded panel.
    pub fn suggestion_frame(&self, editor: &dyn EditorSurface) -> Option<Rect> {
        self.scheduler
            .active()?
            .frame(&self.layout, editor.surface_rect())
    }

    fn prompt_context(&self, query: &str) -> PromptContext {
        PromptContext::assemble(query, self.attachments.as_deref(), &self.cache, &self.config)
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Editor changes
    // ─────────────────────────────────────────────────────────────────────

    /// Feed one editor change. Every change counts as a keystroke: it
    /// dismisses any suggestion and restarts the polling loop.
    pub fn handle_change(&mut self, editor: &mut dyn EditorSurface, edit: &Edit) -> Vec<EngineEvent> {
        self.scheduler.on_keystroke(Instant::now());

        let cursor = cursor_of(editor);
        let candidate = {
            let event = normalize(editor.text(), cursor, edit);
            self.questions.begin(&event)
        };

        match candidate {
            Some(candidate) => self.ask(editor, candidate),
            None => Vec::new(),
        }
    }

    fn ask(
        &mut self,
        editor: &mut dyn EditorSurface,
        candidate: QuestionCandidate,
    ) -> Vec<EngineEvent> {
        let marked = self.questions.mark(editor, candidate);
        let mut events = vec![EngineEvent::QuestionDetected {
            annotation: marked.annotation,
            question: marked.question.clone(),
        }];

        self.questions.await_answer();
        let prompt = question_prompt(&marked.question, &self.prompt_context(&marked.question));

        match self
            .cache
            .request(&marked.question, prompt, self.generator.clone())
        {
            AnswerRequest::Ready(text) => {
                self.questions.resolve(marked.flow, true);
                events.push(self.show_answer(editor, &marked, &text, AnswerOrigin::Cached));
            }
            request => {
                let flow = marked.flow;
                self.pending_question = Some(marked);
                let tx = self.tx.clone();
                spawn_background(self.tx.clone(), QUESTION_TASK, async move {
                    let result = request.resolve().await;
                    let _ = tx.send(EngineMessage::AnswerReady { flow, result });
                });
            }
        }
        events
    }

    fn show_answer(
        &mut self,
        editor: &dyn EditorSurface,
        marked: &MarkedQuestion,
        raw: &str,
        origin: AnswerOrigin,
    ) -> EngineEvent {
        self.annotations.insert(
            marked.annotation,
            AnnotationKind::Answer,
            marked.question.clone(),
            raw,
            marked.marker,
        );
        let top = self.annotation_top(editor, marked.annotation);
        self.present(editor, marked.annotation, AnnotationKind::Answer, &marked.question, raw, origin, top);
        EngineEvent::AnswerShown {
            annotation: marked.annotation,
            origin,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn present(
        &mut self,
        editor: &dyn EditorSurface,
        annotation: AnnotationId,
        kind: AnnotationKind,
        anchor_text: &str,
        raw: &str,
        origin: AnswerOrigin,
        top: f64,
    ) {
        let formatted = format_answer(raw);
        let reveal = match origin {
            AnswerOrigin::Cached => TypingReveal::instant(formatted.clone()),
            AnswerOrigin::Generated | AnswerOrigin::Joined => {
                TypingReveal::from_config(formatted.clone(), &self.config)
            }
        };
        self.view = Some(AnswerView {
            annotation,
            kind,
            anchor_text: anchor_text.to_string(),
            layout: layout_answer(&formatted, &self.config),
            reveal,
            failed: false,
        });
        self.open_panel(editor, annotation, top);
    }

    fn present_failure(&mut self, editor: &dyn EditorSurface, annotation: AnnotationId, kind: AnnotationKind, anchor_text: &str, top: f64) {
        let message = self.config.failure_message.clone();
        self.view = Some(AnswerView {
            annotation,
            kind,
            anchor_text: anchor_text.to_string(),
            layout: AnswerLayout::Single(message.clone()),
            reveal: TypingReveal::instant(message),
            failed: true,
        });
        self.open_panel(editor, annotation, top);
    }

    fn open_panel(&mut self, editor: &dyn EditorSurface, annotation: AnnotationId, top: f64) {
        let anchor = PanelAnchor {
            top,
            editor_right: editor.surface_rect().right(),
        };
        match self.panel.as_mut().filter(|p| p.annotation == annotation) {
            Some(panel) => panel.set_anchor(anchor),
            None => self.panel = Some(FloatingPanel::new(annotation, anchor)),
        }
    }

    fn annotation_top(&self, editor: &dyn EditorSurface, id: AnnotationId) -> f64 {
        let located = match self.annotations.get(id) {
            Some(annotation) => annotations::locate(annotation, editor),
            None => Err(PositionError::AnchorNotFound(id.to_string())),
        };
        located.unwrap_or_else(|err| {
            tracing::warn!(annotation = %id, "{}; using default position", err);
            editor.surface_rect().top
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Background results
    // ─────────────────────────────────────────────────────────────────────

    /// Wait for the next background message.
    pub async fn next_message(&mut self) -> Option<EngineMessage> {
        self.rx.recv().await
    }

    /// Apply every message that has already arrived.
    pub fn drain_messages(&mut self, editor: &mut dyn EditorSurface) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            events.extend(self.handle_message(editor, msg));
        }
        events
    }

    pub fn handle_message(&mut self, editor: &mut dyn EditorSurface, msg: EngineMessage) -> Vec<EngineEvent> {
        match msg {
            EngineMessage::PollTick { loop_id } => {
                let cursor = cursor_of(editor);
                let outcome = self
                    .scheduler
                    .on_poll_tick(loop_id, editor.text(), cursor, Instant::now());
                match outcome {
                    PollOutcome::Trigger(reason) => {
                        let excerpt = heuristics::evaluated_text(editor.text(), cursor);
                        let query = suffix_chars(excerpt, self.config.keyword_window_chars);
                        let prompt = suggestion_prompt(excerpt, reason, &self.prompt_context(query));
                        let anchor = PanelAnchor {
                            top: top_of_offset(editor, cursor),
                            editor_right: editor.surface_rect().right(),
                        };
                        self.scheduler
                            .start_suggestion(reason, prompt, self.generator.clone(), anchor);
                        vec![EngineEvent::SuggestionTriggered { reason }]
                    }
                    PollOutcome::Stale | PollOutcome::Continue | PollOutcome::Exhausted => Vec::new(),
                }
            }
            EngineMessage::SuggestionReady { suggestion, result } => {
                if self.scheduler.on_suggestion_ready(suggestion, result) {
                    vec![EngineEvent::SuggestionIndicator { suggestion }]
                } else {
                    Vec::new()
                }
            }
            EngineMessage::AutoExpand { suggestion } => {
                if self.scheduler.on_auto_expand(suggestion) {
                    vec![EngineEvent::SuggestionExpanded { suggestion }]
                } else {
                    Vec::new()
                }
            }
            EngineMessage::AnswerReady { flow, result } => self.finish_question(editor, flow, result),
            EngineMessage::ActionReady {
                annotation,
                session,
                result,
            } => {
                if session != self.session {
                    return Vec::new();
                }
                self.finish_action(editor, annotation, result)
            }
            EngineMessage::TaskCrashed { task, detail } => {
                tracing::warn!(task, "background task crashed: {}", detail);
                if task == QUESTION_TASK {
                    if let Some(flow) = self.questions.active_flow() {
                        let err = GenerationError::new(detail);
                        return self.finish_question(editor, flow, Err(err));
                    }
                }
                Vec::new()
            }
        }
    }

    fn finish_question(
        &mut self,
        editor: &mut dyn EditorSurface,
        flow: u64,
        result: Result<Answer, GenerationError>,
    ) -> Vec<EngineEvent> {
        if !self.questions.resolve(flow, result.is_ok()) {
            tracing::debug!(flow, "dropping answer for a stale question flow");
            return Vec::new();
        }
        let Some(marked) = self.pending_question.take() else {
            return Vec::new();
        };

        match result {
            Ok(answer) => {
                tracing::debug!(question = %marked.question, origin = ?answer.origin, "answer ready");
                vec![self.show_answer(editor, &marked, &answer.text, answer.origin)]
            }
            Err(err) => {
                tracing::warn!(question = %marked.question, "answer generation failed: {}", err);
                let offset = live_offset(editor, marked.marker, marked.range.start);
                if let Some(marker) = marked.marker {
                    editor.remove_marker(marker);
                    self.questions.forget_marker(marker);
                }
                let top = top_of_offset(editor, offset);
                self.present_failure(editor, marked.annotation, AnnotationKind::Answer, &marked.question, top);
                vec![EngineEvent::AnswerFailed {
                    annotation: marked.annotation,
                    question: marked.question,
                }]
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Selection actions
    // ─────────────────────────────────────────────────────────────────────

    /// Run an AI action on the current selection. Empty selection is a no-op.
    pub fn request_action(&mut self, editor: &mut dyn EditorSurface, kind: AnnotationKind) -> Option<EngineEvent> {
        let selection = editor.selection().filter(|s| s.length > 0)?;
        let text = editor.text();
        let start = floor_char_boundary(text, selection.index);
        let end = floor_char_boundary(text, selection.end());
        let anchor_text = text[start..end].trim().to_string();
        if anchor_text.is_empty() {
            return None;
        }

        let annotation = Uuid::new_v4();
        let marker_id = Uuid::new_v4();
        let marker = match mark_preserving_cursor(editor, start..end, marker_id) {
            Ok(()) => Some(marker_id),
            Err(err) => {
                tracing::warn!(kind = kind.label(), "{}; continuing without a marker", err);
                None
            }
        };

        let key = format!("{}: {}", kind.label(), anchor_text);
        let prompt = action_prompt(kind, &anchor_text, &self.prompt_context(&anchor_text));
        let pending = PendingAction {
            kind,
            anchor_text,
            offset: start,
            marker,
        };

        match self.cache.request(&key, prompt, self.generator.clone()) {
            AnswerRequest::Ready(text) => {
                self.pending_actions.insert(annotation, pending);
                self.finish_action(
                    editor,
                    annotation,
                    Ok(Answer {
                        text,
                        origin: AnswerOrigin::Cached,
                    }),
                )
                .into_iter()
                .next()
            }
            request => {
                self.pending_actions.insert(annotation, pending);
                let tx = self.tx.clone();
                let session = self.session;
                spawn_background(self.tx.clone(), ACTION_TASK, async move {
                    let result = request.resolve().await;
                    let _ = tx.send(EngineMessage::ActionReady {
                        annotation,
                        session,
                        result,
                    });
                });
                Some(EngineEvent::ActionRequested { annotation, kind })
            }
        }
    }

    fn finish_action(
        &mut self,
        editor: &mut dyn EditorSurface,
        annotation: AnnotationId,
        result: Result<Answer, GenerationError>,
    ) -> Vec<EngineEvent> {
        let Some(pending) = self.pending_actions.remove(&annotation) else {
            return Vec::new();
        };

        match result {
            Ok(answer) => {
                self.annotations.insert(
                    annotation,
                    pending.kind,
                    pending.anchor_text.clone(),
                    answer.text.clone(),
                    pending.marker,
                );
                let top = self.annotation_top(editor, annotation);
                self.present(editor, annotation, pending.kind, &pending.anchor_text, &answer.text, answer.origin, top);
                vec![EngineEvent::ActionShown {
                    annotation,
                    kind: pending.kind,
                    origin: answer.origin,
                }]
            }
            Err(err) => {
                tracing::warn!(kind = pending.kind.label(), "selection action failed: {}", err);
                let offset = live_offset(editor, pending.marker, pending.offset);
                if let Some(marker) = pending.marker {
                    editor.remove_marker(marker);
                }
                let top = top_of_offset(editor, offset);
                self.present_failure(editor, annotation, pending.kind, &pending.anchor_text, top);
                vec![EngineEvent::ActionFailed {
                    annotation,
                    kind: pending.kind,
                }]
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Markers, margin buttons and panels
    // ─────────────────────────────────────────────────────────────────────

    /// Re-open a previously answered question from its tagged span. Replays
    /// from the cache without animation; `None` when nothing is cached.
    pub fn click_marker(&mut self, editor: &mut dyn EditorSurface, marker: MarkerId) -> Option<EngineEvent> {
        let question = self.questions.reopen(marker)?;
        let Some(text) = self.cache.get(&question) else {
            tracing::debug!(question = %question, "no cached answer for marker");
            return None;
        };

        let annotation = match self.annotations.by_marker(marker) {
            Some(existing) => existing.id,
            None => self.annotations.create(AnnotationKind::Answer, question.clone(), text.clone(), Some(marker)),
        };
        let top = self.annotation_top(editor, annotation);
        self.present(editor, annotation, AnnotationKind::Answer, &question, &text, AnswerOrigin::Cached, top);
        Some(EngineEvent::AnswerShown {
            annotation,
            origin: AnswerOrigin::Cached,
        })
    }

    /// Open an annotation from its margin button, without animation.
    pub fn open_annotation(&mut self, editor: &dyn EditorSurface, id: AnnotationId) -> bool {
        let Some(annotation) = self.annotations.get(id) else {
            return false;
        };
        let (kind, anchor, payload) = (
            annotation.kind,
            annotation.anchor_text.clone(),
            annotation.payload.clone(),
        );
        let top = self.annotation_top(editor, id);
        self.present(editor, id, kind, &anchor, &payload, AnswerOrigin::Cached, top);
        true
    }

    /// Margin buttons with freshly computed positions.
    pub fn margin_buttons(&mut self, editor: &dyn EditorSurface) -> Vec<MarginButton> {
        self.annotations.refresh_positions(editor);
        self.annotations
            .iter()
            .map(|a| MarginButton {
                annotation: a.id,
                kind: a.kind,
                top: a.screen_top,
            })
            .collect()
    }

    /// Recompute anchors after scroll, resize or content change.
    pub fn refresh_positions(&mut self, editor: &dyn EditorSurface) {
        self.annotations.refresh_positions(editor);
        let editor_right = editor.surface_rect().right();
        if let Some(panel) = self.panel.as_mut() {
            if let Some(top) = self.annotations.screen_top(panel.annotation) {
                panel.set_anchor(PanelAnchor { top, editor_right });
            }
        }
    }

    /// Remove an annotation for good, along with its marker and panel.
    pub fn dismiss_annotation(&mut self, editor: &mut dyn EditorSurface, id: AnnotationId) -> Vec<EngineEvent> {
        let Some(removed) = self.annotations.remove(id) else {
            return Vec::new();
        };
        if let Some(marker) = removed.marker {
            editor.remove_marker(marker);
            self.questions.forget_marker(marker);
        }
        if self.panel.as_ref().is_some_and(|p| p.annotation == id) {
            return self.close_panel().into_iter().collect();
        }
        Vec::new()
    }

    pub fn close_panel(&mut self) -> Option<EngineEvent> {
        let panel = self.panel.take()?;
        self.view = None;
        Some(EngineEvent::PanelClosed {
            annotation: panel.annotation,
        })
    }

    /// Hovering or clicking the suggestion indicator opens it.
    pub fn expand_suggestion(&mut self) -> Option<EngineEvent> {
        let id = self.scheduler.active()?.id;
        self.scheduler
            .expand()
            .then_some(EngineEvent::SuggestionExpanded { suggestion: id })
    }

    /// Advance every running typing reveal by one tick. Returns whether any
    /// is still animating.
    pub fn advance_reveals(&mut self) -> bool {
        let answer = match self.view.as_mut() {
            Some(view) => !view.reveal.tick(),
            None => false,
        };
        let suggestion = self.scheduler.advance_reveal();
        answer || suggestion
    }

    pub fn pointer_down(&mut self, editor: &dyn EditorSurface, p: Point) -> bool {
        let rect = editor.surface_rect();
        match self.panel.as_mut() {
            Some(panel) => panel.pointer_down(p, &self.layout, rect),
            None => false,
        }
    }

    pub fn pointer_move(&mut self, p: Point) -> Option<Point> {
        self.panel.as_mut()?.pointer_move(p)
    }

    pub fn pointer_up(&mut self) {
        if let Some(panel) = self.panel.as_mut() {
            panel.pointer_up();
        }
    }

    /// A click anywhere on screen. The close control and clicks outside both
    /// panel and editor close the panel. A click on the suggestion indicator
    /// expands it; a click outside the suggestion, the editor and the answer
    /// panel dismisses it.
    pub fn click(&mut self, editor: &dyn EditorSurface, p: Point) -> Vec<EngineEvent> {
        let rect = editor.surface_rect();
        let mut events = Vec::new();
        let on_suggestion = self.suggestion_frame(editor).is_some_and(|f| f.contains(p));
        let on_panel = self.panel_frame(editor).is_some_and(|f| f.contains(p));

        if on_suggestion {
            events.extend(self.expand_suggestion());
        } else if !rect.contains(p) && !on_panel {
            self.scheduler.dismiss();
        }

        let Some(panel) = self.panel.as_ref() else {
            return events;
        };
        let close = panel.hit_test(p, &self.layout, rect) == Some(PanelTarget::CloseControl)
            || (!on_suggestion && panel.click_outcome(p, &self.layout, rect) == ClickOutcome::Close);
        if close {
            events.extend(self.close_panel());
        }
        events
    }

    /// Forget everything tied to the current note.
    pub fn reset(&mut self) {
        self.session += 1;
        self.cache.clear();
        self.annotations.clear();
        self.questions.reset();
        self.scheduler.reset();
        self.panel = None;
        self.view = None;
        self.pending_question = None;
        self.pending_actions.clear();
        tracing::debug!(session = self.session, "assistant reset");
    }

    /// Switch to another note. Markers live in the old document and are
    /// dropped with it.
    pub fn switch_note(&mut self) {
        self.reset();
    }
}

fn cursor_of(editor: &dyn EditorSurface) -> usize {
    editor
        .selection()
        .map(|s| s.index)
        .unwrap_or(editor.text().len())
}

/// Current start of a tagged span, or `fallback` when there is no marker.
fn live_offset(editor: &dyn EditorSurface, marker: Option<MarkerId>, fallback: usize) -> usize {
    marker
        .and_then(|m| editor.marker_range(m))
        .map(|r| r.start)
        .unwrap_or(fallback)
}

fn top_of_offset(editor: &dyn EditorSurface, offset: usize) -> f64 {
    match editor.bounds(offset) {
        Some(bounds) => bounds.top,
        None => {
            tracing::warn!("{}; using default position", PositionError::NoBounds(offset));
            editor.surface_rect().top
        }
    }
}
