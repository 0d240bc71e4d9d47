//! Generation collaborator boundary
//!
//! The engine treats text generation as an opaque `generate(prompt)` call
//! with its own latency and failure profile. [`client::OpenRouterGenerator`]
//! is the production implementation; tests plug in fakes.

pub mod client;
pub mod models;
pub mod prompts;

pub use client::OpenRouterGenerator;
pub use models::{Model, Usage};

use crate::error::GenerationError;
use async_trait::async_trait;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
