//! Marginalia library crate
//!
//! Inline AI assistance for note editors: detects finished questions and
//! mature thoughts, answers them through a single-flight cache, and keeps
//! the resulting annotations anchored next to the text that produced them.
//! The editor surface and the text generator are collaborators behind
//! traits; [`engine::InlineAssistant`] ties everything together.

pub mod annotations;
pub mod cache;
pub mod config;
pub mod context;
pub mod editor;
pub mod engine;
pub mod error;
pub mod format;
pub mod generate;
pub mod heuristics;
pub mod panel;
pub mod question;
pub mod scheduler;
pub mod text;
pub mod util;

pub use engine::{EngineEvent, InlineAssistant};
