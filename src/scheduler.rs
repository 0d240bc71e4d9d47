//! Proactive suggestion scheduling
//!
//! The scheduler owns the per-document [`TriggerState`] and is the only
//! caller of the trigger heuristics. Each keystroke restarts a bounded
//! polling loop (a cancellable timer task); every tick re-evaluates the
//! heuristics against the live text. On a positive decision the scheduler
//! records the trigger, issues exactly one generation call and walks the
//! result through progressive disclosure: indicator first, full panel on
//! hover/click or after the auto-expand delay.

use crate::config::EngineConfig;
use crate::engine::background::spawn_background;
use crate::engine::messages::EngineMessage;
use crate::error::GenerationError;
use crate::format::{format_answer, TypingReveal};
use crate::generate::Generator;
use crate::heuristics::{self, Decision, TriggerReason};
use crate::panel::{PanelAnchor, PanelLayout, Rect};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Typing and suggestion history for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerState {
    last_typing: Option<Instant>,
    last_suggestion: Option<Instant>,
    suggestion_count: u32,
    last_analyzed_hash: Option<u64>,
}

impl TriggerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed_at(mut self, at: Instant) -> Self {
        self.last_typing = Some(at);
        self
    }

    pub fn suggested_at(mut self, at: Instant) -> Self {
        self.last_suggestion = Some(at);
        self
    }

    pub fn analyzed(mut self, fingerprint: u64) -> Self {
        self.last_analyzed_hash = Some(fingerprint);
        self
    }

    pub fn last_typing(&self) -> Option<Instant> {
        self.last_typing
    }

    pub fn last_suggestion(&self) -> Option<Instant> {
        self.last_suggestion
    }

    pub fn suggestion_count(&self) -> u32 {
        self.suggestion_count
    }

    pub fn last_analyzed_hash(&self) -> Option<u64> {
        self.last_analyzed_hash
    }

    /// Time since the last keystroke. Never typed counts as idle forever.
    pub fn idle_for(&self, now: Instant) -> Duration {
        self.last_typing
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(Duration::MAX)
    }

    pub fn since_last_suggestion(&self, now: Instant) -> Option<Duration> {
        self.last_suggestion
            .map(|t| now.saturating_duration_since(t))
    }

    fn record_keystroke(&mut self, now: Instant) {
        self.last_typing = Some(now);
    }

    fn record_suggestion(&mut self, now: Instant, fingerprint: u64) {
        self.last_suggestion = Some(now);
        self.suggestion_count += 1;
        self.last_analyzed_hash = Some(fingerprint);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disclosure {
    /// Generation in flight, nothing shown yet
    Pending,
    /// Small marker in the margin
    Indicator,
    /// Full panel with typing reveal
    Expanded,
}

#[derive(Debug)]
pub struct Suggestion {
    pub id: u64,
    pub reason: TriggerReason,
    /// Formatted suggestion text, once generated
    pub text: Option<String>,
    pub disclosure: Disclosure,
    /// Where the indicator and panel attach, level with the cursor line
    pub anchor: PanelAnchor,
    reveal: Option<TypingReveal>,
    auto_expand: Option<CancellationToken>,
}

impl Suggestion {
    pub fn reveal(&self) -> Option<&TypingReveal> {
        self.reveal.as_ref()
    }

    /// Screen area the suggestion occupies. Nothing is shown while the
    /// generation is pending.
    pub fn frame(&self, layout: &PanelLayout, editor: Rect) -> Option<Rect> {
        match self.disclosure {
            Disclosure::Pending => None,
            Disclosure::Indicator => Some(layout.indicator_frame(self.anchor, editor)),
            Disclosure::Expanded => Some(layout.frame(self.anchor, editor)),
        }
    }
}

/// What a polling tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Tick from a cancelled or replaced loop
    Stale,
    Continue,
    /// Last check of the loop came up empty
    Exhausted,
    Trigger(TriggerReason),
}

#[derive(Debug)]
struct PollLoop {
    id: u64,
    remaining: u64,
    cancel: CancellationToken,
}

pub struct SuggestionScheduler {
    config: EngineConfig,
    state: TriggerState,
    tx: UnboundedSender<EngineMessage>,
    poll: Option<PollLoop>,
    active: Option<Suggestion>,
    next_id: u64,
}

impl SuggestionScheduler {
    pub fn new(config: EngineConfig, tx: UnboundedSender<EngineMessage>) -> Self {
        Self {
            config,
            state: TriggerState::default(),
            tx,
            poll: None,
            active: None,
            next_id: 0,
        }
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub fn active(&self) -> Option<&Suggestion> {
        self.active.as_ref()
    }

    fn mint_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// A keystroke cancels whatever is showing and restarts polling.
    pub fn on_keystroke(&mut self, now: Instant) {
        self.state.record_keystroke(now);
        self.dismiss();
        self.restart_polling();
    }

    /// Start a fresh polling loop, cancelling the previous one.
    pub fn restart_polling(&mut self) {
        self.cancel_polling();

        let id = self.mint_id();
        let cancel = CancellationToken::new();
        let checks = self.config.poll_checks();
        let interval = self.config.poll_interval();
        self.poll = Some(PollLoop {
            id,
            remaining: checks,
            cancel: cancel.clone(),
        });

        let tx = self.tx.clone();
        spawn_background(self.tx.clone(), "suggestion_poll", async move {
            for _ in 0..checks {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if tx.send(EngineMessage::PollTick { loop_id: id }).is_err() {
                    return;
                }
            }
        });
    }

    /// Stop the current polling loop. Safe to call when none is running.
    pub fn cancel_polling(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.cancel.cancel();
        }
    }

    /// Run one heuristic check for polling loop `loop_id`.
    pub fn on_poll_tick(&mut self, loop_id: u64, text: &str, cursor: usize, now: Instant) -> PollOutcome {
        let remaining = match self.poll.as_mut() {
            Some(poll) if poll.id == loop_id => {
                poll.remaining = poll.remaining.saturating_sub(1);
                poll.remaining
            }
            _ => return PollOutcome::Stale,
        };

        match heuristics::evaluate(text, cursor, &self.state, now, &self.config) {
            Decision::Trigger(reason) => {
                self.cancel_polling();
                let evaluated = heuristics::evaluated_text(text, cursor);
                let fingerprint = heuristics::content_fingerprint(evaluated, &self.config);
                self.state.record_suggestion(now, fingerprint);
                tracing::info!(
                    reason = reason.label(),
                    count = self.state.suggestion_count,
                    "proactive suggestion triggered"
                );
                PollOutcome::Trigger(reason)
            }
            Decision::Skip(skip) => {
                tracing::debug!(?skip, remaining, "suggestion check skipped");
                if remaining == 0 {
                    self.poll = None;
                    PollOutcome::Exhausted
                } else {
                    PollOutcome::Continue
                }
            }
        }
    }

    /// Issue the single generation call for a fired trigger.
    pub fn start_suggestion(
        &mut self,
        reason: TriggerReason,
        prompt: String,
        generator: Arc<dyn Generator>,
        anchor: PanelAnchor,
    ) -> u64 {
        self.dismiss();
        let id = self.mint_id();
        self.active = Some(Suggestion {
            id,
            reason,
            text: None,
            disclosure: Disclosure::Pending,
            anchor,
            reveal: None,
            auto_expand: None,
        });

        let tx = self.tx.clone();
        spawn_background(self.tx.clone(), "suggestion_generate", async move {
            let result = generator.generate(&prompt).await;
            let _ = tx.send(EngineMessage::SuggestionReady {
                suggestion: id,
                result,
            });
        });
        id
    }

    /// Show a generated suggestion as an indicator. Returns whether it is
    /// now visible.
    pub fn on_suggestion_ready(&mut self, id: u64, result: Result<String, GenerationError>) -> bool {
        let Some(active) = self.active.as_mut().filter(|s| s.id == id) else {
            tracing::debug!(suggestion = id, "discarding suggestion for dismissed trigger");
            return false;
        };

        match result {
            Ok(text) => {
                active.text = Some(format_answer(&text));
                active.disclosure = Disclosure::Indicator;
                let cancel = CancellationToken::new();
                active.auto_expand = Some(cancel.clone());

                let delay = self.config.auto_expand();
                let tx = self.tx.clone();
                spawn_background(self.tx.clone(), "suggestion_auto_expand", async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(EngineMessage::AutoExpand { suggestion: id });
                        }
                    }
                });
                true
            }
            Err(err) => {
                tracing::warn!(suggestion = id, "suggestion generation failed: {}", err);
                self.active = None;
                false
            }
        }
    }

    pub fn on_auto_expand(&mut self, id: u64) -> bool {
        if self.active.as_ref().is_some_and(|s| s.id == id) {
            self.expand()
        } else {
            false
        }
    }

    /// Hover or click on the indicator opens the full panel.
    pub fn expand(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.disclosure != Disclosure::Indicator {
            return false;
        }
        if let Some(cancel) = active.auto_expand.take() {
            cancel.cancel();
        }
        active.disclosure = Disclosure::Expanded;
        active.reveal = active
            .text
            .as_deref()
            .map(|text| TypingReveal::from_config(text, &self.config));
        true
    }

    /// Advance the typing reveal of an expanded suggestion. Returns whether
    /// anything is still animating.
    pub fn advance_reveal(&mut self) -> bool {
        match self.active.as_mut().and_then(|s| s.reveal.as_mut()) {
            Some(reveal) => !reveal.tick(),
            None => false,
        }
    }

    /// Remove the indicator or panel (keystroke or outside click).
    pub fn dismiss(&mut self) {
        if let Some(suggestion) = self.active.take() {
            if let Some(cancel) = suggestion.auto_expand {
                cancel.cancel();
            }
            tracing::debug!(suggestion = suggestion.id, "suggestion dismissed");
        }
    }

    /// Forget all history, as on a note switch.
    pub fn reset(&mut self) {
        self.cancel_polling();
        self.dismiss();
        self.state = TriggerState::default();
    }
}

impl Drop for SuggestionScheduler {
    fn drop(&mut self) {
        self.cancel_polling();
        self.dismiss();
    }
}
