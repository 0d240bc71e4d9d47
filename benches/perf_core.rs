use criterion::{black_box, criterion_group, criterion_main, Criterion};
use marginalia::cache::CachedAnswer;
use marginalia::config::EngineConfig;
use marginalia::context::matching_answers;
use marginalia::format::{format_answer, layout_answer};
use marginalia::heuristics;
use marginalia::scheduler::TriggerState;
use marginalia::text::{normalize, Edit};
use std::time::Duration;
use tokio::time::Instant;

fn synthetic_note(paragraphs: usize) -> String {
    let mut note = String::new();
    for i in 0..paragraphs {
        note.push_str(&format!(
            "Section {i} covers the rollout plan for team {i}. We drafted the timeline and \
             shared it with the reviewers. Maybe the migration should happen in two phases, \
             but the budget review is still open and\n\n"
        ));
    }
    note.push_str("I am not sure what the best approach is.");
    note
}

fn bench_should_trigger(c: &mut Criterion) {
    let config = EngineConfig::default();
    let note = synthetic_note(400);
    let now = Instant::now() + Duration::from_secs(3_600);
    let state = TriggerState::new().typed_at(now - Duration::from_secs(5));

    c.bench_function("should_trigger_long_note", |b| {
        b.iter(|| {
            black_box(heuristics::should_trigger(
                black_box(&note),
                note.len(),
                &state,
                now,
                &config,
            ))
        });
    });

    c.bench_function("analyze_long_note", |b| {
        b.iter(|| black_box(heuristics::analyze(black_box(&note), note.len(), &config)));
    });
}

fn bench_normalize(c: &mut Criterion) {
    let note = synthetic_note(400);
    let edit = Edit::Insert {
        at: note.len() - 1,
        text: ".".to_string(),
    };

    c.bench_function("normalize_keystroke", |b| {
        b.iter(|| {
            let event = normalize(black_box(&note), note.len(), &edit);
            black_box(event.just_typed());
        });
    });
}

fn bench_answer_formatting(c: &mut Criterion) {
    let config = EngineConfig::default();
    let raw = "A long answer line\nthat wraps.\n\n".repeat(40);

    c.bench_function("format_and_layout_answer", |b| {
        b.iter(|| {
            let formatted = format_answer(black_box(&raw));
            black_box(layout_answer(&formatted, &config));
        });
    });
}

fn bench_matching_answers(c: &mut Criterion) {
    let entries: Vec<CachedAnswer> = (0..500)
        .map(|i| CachedAnswer {
            question: format!("How should the rollout for team {i} be staged?"),
            answer: format!("Stage team {i} after the budget review."),
            generated_at: chrono::Utc::now(),
        })
        .collect();

    c.bench_function("matching_answers_500", |b| {
        b.iter(|| {
            black_box(matching_answers(
                black_box("What about staging the rollout budget?"),
                &entries,
                3,
            ))
        });
    });
}

criterion_group!(
    perf_core,
    bench_should_trigger,
    bench_normalize,
    bench_answer_formatting,
    bench_matching_answers
);
criterion_main!(perf_core);
