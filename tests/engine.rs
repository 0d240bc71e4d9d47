use async_trait::async_trait;
use marginalia::annotations::AnnotationKind;
use marginalia::cache::{AnswerCache, AnswerOrigin};
use marginalia::config::EngineConfig;
use marginalia::context::{Attachment, AttachmentKind, StaticAttachments};
use marginalia::editor::{EditorSurface, PlainTextEditor};
use marginalia::error::GenerationError;
use marginalia::generate::Generator;
use marginalia::heuristics::{self, Decision, TriggerReason};
use marginalia::panel::Point;
use marginalia::scheduler::{Disclosure, TriggerState};
use marginalia::{EngineEvent, InlineAssistant};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const HELP_TEXT: &str = "I have been drafting the onboarding plan for new hires all week. \
Maybe I should restructure this. I am not sure what the best approach is.";

/// Generator that counts calls and answers after a short delay.
struct SlowGenerator {
    calls: AtomicUsize,
    reply: String,
}

impl SlowGenerator {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for SlowGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(self.reply.clone())
    }
}

fn type_all(assistant: &mut InlineAssistant, editor: &mut PlainTextEditor, text: &str) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    for c in text.chars() {
        let edit = editor.type_str(&c.to_string());
        events.extend(assistant.handle_change(editor, &edit));
    }
    events
}

/// Handle background messages until `count` events match `done`.
async fn settle(
    assistant: &mut InlineAssistant,
    editor: &mut PlainTextEditor,
    count: usize,
    done: impl Fn(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while events.iter().filter(|e| done(e)).count() < count {
        let msg = tokio::time::timeout(Duration::from_secs(60), assistant.next_message())
            .await
            .expect("engine went quiet")
            .expect("channel closed");
        events.extend(assistant.handle_message(editor, msg));
    }
    events
}

#[tokio::test(start_paused = true)]
async fn typed_question_triggers_exactly_one_generation() {
    let generator = SlowGenerator::new("By composing small parts.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator.clone());
    let mut editor = PlainTextEditor::new("");

    let events = type_all(&mut assistant, &mut editor, "I wonder how this works?");
    let detected: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::QuestionDetected { .. }))
        .collect();
    assert_eq!(detected.len(), 1);

    let events = settle(&mut assistant, &mut editor, 1, |e| {
        matches!(e, EngineEvent::AnswerShown { .. })
    })
    .await;
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::AnswerShown {
            origin: AnswerOrigin::Generated,
            ..
        }
    )));
    assert_eq!(generator.calls(), 1);
    assert_eq!(assistant.annotations().len(), 1);
    assert_eq!(editor.text(), "I wonder how this works?");
}

#[tokio::test(start_paused = true)]
async fn repeated_question_replays_from_cache_without_animation() {
    let generator = SlowGenerator::new("Because of caching.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator.clone());
    let mut editor = PlainTextEditor::new("");

    type_all(&mut assistant, &mut editor, "Why is it fast?");
    settle(&mut assistant, &mut editor, 1, |e| matches!(e, EngineEvent::AnswerShown { .. })).await;

    let events = type_all(&mut assistant, &mut editor, "\n  WHY IS IT FAST?");
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::AnswerShown {
            origin: AnswerOrigin::Cached,
            ..
        }
    )));
    let view = assistant.view().expect("panel content");
    assert!(view.reveal.is_complete());
    assert_eq!(view.reveal.visible(), "Because of caching.");
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn marking_a_question_keeps_the_cursor_and_following_text() {
    let generator = SlowGenerator::new("Soon.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator);
    let mut editor = PlainTextEditor::new("\nTrailing line stays put.");
    editor.set_selection(0, 0);

    type_all(&mut assistant, &mut editor, "When is it due?");
    assert_eq!(editor.caret(), 15);
    assert_eq!(editor.text(), "When is it due?\nTrailing line stays put.");

    settle(&mut assistant, &mut editor, 1, |e| matches!(e, EngineEvent::AnswerShown { .. })).await;
    let annotation = assistant.view().expect("panel content").annotation;
    let marker = assistant
        .annotations()
        .get(annotation)
        .and_then(|a| a.marker)
        .expect("question span tagged");
    assert_eq!(editor.marker_range(marker), Some(0..15));
    assert_eq!(editor.caret(), 15);
}

#[tokio::test(start_paused = true)]
async fn concurrent_selection_actions_share_one_generation() {
    let generator = SlowGenerator::new("A measure of disorder.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator.clone());
    let mut editor = PlainTextEditor::new("Entropy always increases.");

    editor.set_selection(0, 7);
    let first = assistant.request_action(&mut editor, AnnotationKind::Definition);
    editor.set_selection(0, 7);
    let second = assistant.request_action(&mut editor, AnnotationKind::Definition);
    assert!(matches!(first, Some(EngineEvent::ActionRequested { .. })));
    assert!(matches!(second, Some(EngineEvent::ActionRequested { .. })));

    let events = settle(&mut assistant, &mut editor, 2, |e| {
        matches!(e, EngineEvent::ActionShown { .. })
    })
    .await;
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::ActionShown {
            origin: AnswerOrigin::Joined,
            ..
        }
    )));
    assert_eq!(generator.calls(), 1);
    assert_eq!(assistant.annotations().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_single_flight_under_concurrency() {
    let generator = SlowGenerator::new("Shared.");
    let cache = AnswerCache::new();

    let requests = (0..4).map(|i| {
        let cache = cache.clone();
        let generator: Arc<dyn Generator> = generator.clone();
        let question = if i % 2 == 0 { "What is it?" } else { "  what is it?  " };
        async move { cache.get_or_generate(question, "prompt".to_string(), generator).await }
    });
    let answers = futures::future::join_all(requests).await;

    assert_eq!(generator.calls(), 1);
    assert!(answers
        .iter()
        .all(|a| matches!(a, Ok(answer) if answer.text == "Shared.")));
    assert_eq!(cache.get("WHAT IS IT?").as_deref(), Some("Shared."));
}

#[test]
fn help_seeking_note_respects_idle_floor() {
    let config = EngineConfig::default();
    let now = Instant::now() + Duration::from_secs(3_600);

    let idle = TriggerState::new().typed_at(now - Duration::from_millis(3_500));
    assert!(heuristics::should_trigger(HELP_TEXT, HELP_TEXT.len(), &idle, now, &config));

    let recent = TriggerState::new().typed_at(now - Duration::from_millis(2_500));
    assert!(!heuristics::should_trigger(HELP_TEXT, HELP_TEXT.len(), &recent, now, &config));

    let cooling = idle.clone().suggested_at(now - Duration::from_secs(10));
    assert!(!heuristics::should_trigger(HELP_TEXT, HELP_TEXT.len(), &cooling, now, &config));
}

#[test]
fn short_note_never_triggers() {
    let config = EngineConfig::default();
    let now = Instant::now() + Duration::from_secs(3_600);
    let state = TriggerState::new().typed_at(now - Duration::from_secs(60));
    let text = "I'm not sure what to do.";
    assert!(!heuristics::should_trigger(text, text.len(), &state, now, &config));
}

#[tokio::test(start_paused = true)]
async fn proactive_suggestion_walks_through_disclosure() {
    let generator = SlowGenerator::new("Try grouping the plan by week.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator.clone());
    let mut editor = PlainTextEditor::new("");

    assert!(type_all(&mut assistant, &mut editor, HELP_TEXT).is_empty());
    let started = Instant::now();

    let events = settle(&mut assistant, &mut editor, 1, |e| {
        matches!(e, EngineEvent::SuggestionTriggered { .. })
    })
    .await;
    assert!(events.contains(&EngineEvent::SuggestionTriggered {
        reason: TriggerReason::HelpSeeking
    }));
    assert!(started.elapsed() >= Duration::from_millis(3_000));
    assert!(!assistant.scheduler().is_polling());

    settle(&mut assistant, &mut editor, 1, |e| {
        matches!(e, EngineEvent::SuggestionIndicator { .. })
    })
    .await;
    assert_eq!(
        assistant.scheduler().active().map(|s| s.disclosure),
        Some(Disclosure::Indicator)
    );

    settle(&mut assistant, &mut editor, 1, |e| {
        matches!(e, EngineEvent::SuggestionExpanded { .. })
    })
    .await;
    assert_eq!(
        assistant.scheduler().active().map(|s| s.disclosure),
        Some(Disclosure::Expanded)
    );
    while assistant.advance_reveals() {}
    let reveal = assistant
        .scheduler()
        .active()
        .and_then(|s| s.reveal())
        .expect("expanded suggestion reveals text");
    assert_eq!(reveal.visible(), "Try grouping the plan by week.");
    assert_eq!(generator.calls(), 1);

    type_all(&mut assistant, &mut editor, " ");
    assert!(assistant.scheduler().active().is_none());
    assert_eq!(assistant.scheduler().state().suggestion_count(), 1);
}

#[test]
fn unchanged_note_is_not_analyzed_twice() {
    let config = EngineConfig::default();
    let now = Instant::now() + Duration::from_secs(3_600);
    let fingerprint = heuristics::content_fingerprint(HELP_TEXT, &config);
    let state = TriggerState::new()
        .typed_at(now - Duration::from_secs(10))
        .analyzed(fingerprint);
    assert!(matches!(
        heuristics::evaluate(HELP_TEXT, HELP_TEXT.len(), &state, now, &config),
        Decision::Skip(_)
    ));
}

/// Generator that records every prompt it is given.
struct RecordingGenerator {
    prompts: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .expect("prompt log")
            .push(prompt.to_string());
        Ok("Noted.".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn attachments_and_prior_answers_reach_the_prompt() {
    let generator = Arc::new(RecordingGenerator {
        prompts: std::sync::Mutex::new(Vec::new()),
    });
    let source = StaticAttachments(vec![Attachment::new(
        "standup.m4a",
        AttachmentKind::Transcript,
        "We agreed to ship the rollout in two phases.",
    )]);
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator.clone())
        .with_attachments(Arc::new(source));
    let mut editor = PlainTextEditor::new("");

    type_all(&mut assistant, &mut editor, "When does the rollout start?");
    settle(&mut assistant, &mut editor, 1, |e| matches!(e, EngineEvent::AnswerShown { .. })).await;
    type_all(&mut assistant, &mut editor, "\nWho owns the rollout?");
    settle(&mut assistant, &mut editor, 1, |e| matches!(e, EngineEvent::AnswerShown { .. })).await;

    let prompts = generator.prompts.lock().expect("prompt log").clone();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("standup.m4a"));
    assert!(prompts[0].contains("two phases"));
    assert!(!prompts[0].contains("EARLIER IN THIS NOTE"));
    assert!(prompts[1].contains("Q: When does the rollout start?"));
    assert!(prompts[1].contains("A: Noted."));
}

#[tokio::test(start_paused = true)]
async fn dragged_panel_keeps_its_position_until_closed() {
    let generator = SlowGenerator::new("Drag me.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator);
    let mut editor = PlainTextEditor::new("");

    type_all(&mut assistant, &mut editor, "Where will it go?");
    settle(&mut assistant, &mut editor, 1, |e| matches!(e, EngineEvent::AnswerShown { .. })).await;

    let frame = assistant.panel_frame(&editor).expect("panel open");
    assert!(frame.left >= editor.surface_rect().right());

    let grab = Point::new(frame.left + 10.0, frame.top + 100.0);
    assert!(assistant.pointer_down(&editor, grab));
    assistant.pointer_move(Point::new(grab.x - 400.0, grab.y + 50.0));
    assistant.pointer_up();

    let moved = assistant.panel_frame(&editor).expect("panel open");
    assert_eq!(moved.left, frame.left - 400.0);
    assert_eq!(moved.top, frame.top + 50.0);

    editor.set_scroll_top(40.0);
    assistant.refresh_positions(&editor);
    assert_eq!(assistant.panel_frame(&editor), Some(moved));

    let annotation = assistant.view().expect("panel content").annotation;
    assistant.close_panel();
    assert!(assistant.open_annotation(&editor, annotation));
    let reopened = assistant.panel_frame(&editor).expect("panel reopened");
    assert!(reopened.left >= editor.surface_rect().right());
    assert!(assistant.view().expect("panel content").reveal.is_complete());
}

#[tokio::test(start_paused = true)]
async fn hovering_the_indicator_expands_before_the_timer() {
    let generator = SlowGenerator::new("Consider a phased plan.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator);
    let mut editor = PlainTextEditor::new("");

    type_all(&mut assistant, &mut editor, HELP_TEXT);
    settle(&mut assistant, &mut editor, 1, |e| {
        matches!(e, EngineEvent::SuggestionIndicator { .. })
    })
    .await;

    let expanded = assistant.expand_suggestion();
    assert!(matches!(expanded, Some(EngineEvent::SuggestionExpanded { .. })));
    assert!(assistant.expand_suggestion().is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let late = assistant.drain_messages(&mut editor);
    assert!(!late
        .iter()
        .any(|e| matches!(e, EngineEvent::SuggestionExpanded { .. })));

    assistant.click(&editor, Point::new(5_000.0, 5_000.0));
    assert!(assistant.scheduler().active().is_none());
}

#[tokio::test(start_paused = true)]
async fn clicks_inside_the_suggestion_keep_it_open() {
    let generator = SlowGenerator::new("Consider a phased plan.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator);
    let mut editor = PlainTextEditor::new("");

    type_all(&mut assistant, &mut editor, HELP_TEXT);
    settle(&mut assistant, &mut editor, 1, |e| {
        matches!(e, EngineEvent::SuggestionIndicator { .. })
    })
    .await;

    let indicator = assistant.suggestion_frame(&editor).unwrap();
    let surface = editor.surface_rect();
    assert!(indicator.left > surface.right());
    assert_eq!(indicator.top, editor.bounds(editor.caret()).unwrap().top);

    let events = assistant.click(&editor, Point::new(indicator.left + 4.0, indicator.top + 4.0));
    assert!(matches!(events.as_slice(), [EngineEvent::SuggestionExpanded { .. }]));
    assert_eq!(assistant.scheduler().active().unwrap().disclosure, Disclosure::Expanded);

    let expanded = assistant.suggestion_frame(&editor).unwrap();
    assert!(expanded.height > indicator.height);
    let inside = Point::new(expanded.left + 10.0, expanded.top + 100.0);
    assert!(!surface.contains(inside));
    assert!(assistant.click(&editor, inside).is_empty());
    assert!(assistant.scheduler().active().is_some());

    assistant.click(&editor, Point::new(expanded.right() + 50.0, expanded.bottom() + 50.0));
    assert!(assistant.scheduler().active().is_none());
    assert!(assistant.suggestion_frame(&editor).is_none());
}

#[tokio::test(start_paused = true)]
async fn switching_notes_drops_in_flight_answers() {
    let generator = SlowGenerator::new("Too late.");
    let mut assistant = InlineAssistant::new(EngineConfig::default(), generator.clone());
    let mut editor = PlainTextEditor::new("");

    type_all(&mut assistant, &mut editor, "Is anyone there?");
    assert!(assistant.questions().is_processing());
    assistant.switch_note();
    assert!(!assistant.questions().is_processing());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let events = assistant.drain_messages(&mut editor);
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::AnswerShown { .. })));
    assert!(assistant.cache().is_empty());
    assert!(assistant.annotations().is_empty());
    assert!(assistant.panel().is_none());
    assert_eq!(generator.calls(), 1);
}
