use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use marginalia::cache::AnswerCache;
use marginalia::config::Config;
use marginalia::context::PromptContext;
use marginalia::editor::PlainTextEditor;
use marginalia::error::GenerationError;
use marginalia::format::{format_answer, layout_answer, AnswerLayout};
use marginalia::generate::prompts::question_prompt;
use marginalia::generate::{Generator, Model, OpenRouterGenerator};
use marginalia::heuristics;
use marginalia::scheduler::TriggerState;
use marginalia::{EngineEvent, InlineAssistant};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "marginalia",
    about = "Inline AI assistance for notes: questions, suggestions, margin annotations",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the trigger heuristic report for a note
    Check(CheckArgs),
    /// Ask one question and print the formatted answer
    Ask {
        question: String,
        /// Use the slower model with better reasoning
        #[arg(long)]
        balanced: bool,
    },
    /// Type a note into an in-memory editor and report what the assistant did
    Replay {
        file: PathBuf,
        /// Use the slower model with better reasoning
        #[arg(long)]
        balanced: bool,
    },
}

#[derive(Args, Debug)]
struct CheckArgs {
    file: PathBuf,
    /// Milliseconds since the last keystroke
    #[arg(long, default_value_t = 3_500)]
    idle_ms: u64,
    /// Cursor byte offset (defaults to the end of the note)
    #[arg(long)]
    cursor: Option<usize>,
    /// Milliseconds since the previous suggestion, if there was one
    #[arg(long)]
    since_suggestion_ms: Option<u64>,
}

/// Stand-in when no API key is configured; every request fails inline.
struct OfflineGenerator;

#[async_trait]
impl Generator for OfflineGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::new("no OpenRouter API key configured"))
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("MARGINALIA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Check(args) => run_check(&config, args),
        Commands::Ask { question, balanced } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_ask(&config, &question, tier(balanced)))
        }
        Commands::Replay { file, balanced } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_replay(&config, file, tier(balanced)))
        }
    }
}

fn tier(balanced: bool) -> Model {
    if balanced {
        Model::Balanced
    } else {
        Model::Speed
    }
}

fn run_check(config: &Config, args: CheckArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let cursor = args.cursor.unwrap_or(text.len());
    let engine = &config.engine;

    let now = Instant::now();
    let mut state = TriggerState::new();
    if let Some(typed) = now.checked_sub(Duration::from_millis(args.idle_ms)) {
        state = state.typed_at(typed);
    }
    if let Some(since) = args.since_suggestion_ms {
        if let Some(suggested) = now.checked_sub(Duration::from_millis(since)) {
            state = state.suggested_at(suggested);
        }
    }

    let analysis = heuristics::analyze(&text, cursor, engine);
    let decision = heuristics::evaluate(&text, cursor, &state, now, engine);

    println!("{}", args.file.display());
    println!("  words:            {}", analysis.word_count);
    println!("  sentences:        {}", analysis.sentence_count);
    println!("  avg sentence:     {:.1} words", analysis.avg_sentence_words);
    println!("  paragraph break:  {}", analysis.has_paragraph_break);
    println!("  terminal ending:  {}", analysis.ends_with_terminal);
    println!("  help-seeking:     {}", analysis.help_seeking);
    println!("  incomplete:       {}", analysis.incomplete_thought);
    println!("  repetition:       {}", analysis.repetition);
    let signals: Vec<_> = analysis.signals().iter().map(|s| s.label()).collect();
    println!("  signals:          {}", if signals.is_empty() { "none".to_string() } else { signals.join(", ") });
    println!("  idle:             {} ms", args.idle_ms);
    println!("  decision:         {:?}", decision);
    Ok(())
}

async fn run_ask(config: &Config, question: &str, tier: Model) -> Result<()> {
    let generator = OpenRouterGenerator::from_config(config, tier).context(
        "No OpenRouter API key. Set OPENROUTER_API_KEY or store one in the system keychain.",
    )?;
    let cache = AnswerCache::new();
    let prompt = question_prompt(question, &PromptContext::default());
    let answer = cache
        .get_or_generate(question, prompt, Arc::new(generator))
        .await?;

    print_answer(&format_answer(&answer.text), config);
    Ok(())
}

fn print_answer(formatted: &str, config: &Config) {
    match layout_answer(formatted, &config.engine) {
        AnswerLayout::Single(text) => println!("{}", text),
        AnswerLayout::Columns { left, right } => {
            println!("{}", left);
            println!("\n    ────────\n");
            println!("{}", right);
        }
    }
}

async fn run_replay(config: &Config, file: PathBuf, tier: Model) -> Result<()> {
    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let generator: Arc<dyn Generator> = match OpenRouterGenerator::from_config(config, tier) {
        Some(generator) => Arc::new(generator),
        None => {
            tracing::warn!("no API key configured; answers will fail inline");
            Arc::new(OfflineGenerator)
        }
    };
    let mut assistant = InlineAssistant::new(config.engine.clone(), generator);
    let mut editor = PlainTextEditor::new("");

    for c in text.chars() {
        let edit = editor.type_str(&c.to_string());
        for event in assistant.handle_change(&mut editor, &edit) {
            report(&event);
        }
        // Let a detected question settle before typing on, so later
        // questions are not swallowed by the one-flow-at-a-time guard.
        while assistant.questions().is_processing() {
            let msg = tokio::time::timeout(Duration::from_secs(120), assistant.next_message())
                .await
                .context("Timed out waiting for an answer")?;
            let Some(msg) = msg else { break };
            for event in assistant.handle_message(&mut editor, msg) {
                report(&event);
            }
        }
    }

    println!("\nAnnotations:");
    for button in assistant.margin_buttons(&editor) {
        if let Some(annotation) = assistant.annotations().get(button.annotation) {
            println!(
                "  [{}] at {:>6.1}px  {}",
                annotation.kind.label(),
                button.top,
                annotation.anchor_text
            );
        }
    }
    if assistant.annotations().is_empty() {
        println!("  (none)");
    }
    Ok(())
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::QuestionDetected { question, .. } => println!("? {}", question),
        EngineEvent::AnswerShown { origin, .. } => println!("  answered ({:?})", origin),
        EngineEvent::AnswerFailed { .. } => println!("  no answer"),
        other => tracing::debug!(?other, "assistant event"),
    }
}
