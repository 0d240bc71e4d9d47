//! Session answer cache with single-flight generation
//!
//! Answers are keyed by the normalized question (`trim(lowercase(q))`). For a
//! given key at most one generation is in flight: a second request while the
//! first is pending joins the first instead of issuing another call. Entries
//! never expire; the whole cache is cleared on note switch.
//!
//! Failures are not cached, so asking again retries generation. A panic in
//! the generator counts as a failure.

use crate::error::GenerationError;
use crate::generate::Generator;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cache / identity key for a question.
pub fn normalize_question(question: &str) -> String {
    question.to_lowercase().trim().to_string()
}

/// A cached question answer entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    /// The question as first asked
    pub question: String,
    /// Raw, unformatted answer text
    pub answer: String,
    pub generated_at: DateTime<Utc>,
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOrigin {
    /// Replayed from the cache without generating
    Cached,
    /// This request issued the generation call
    Generated,
    /// This request joined a generation already in flight
    Joined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub origin: AnswerOrigin,
}

pub type PendingAnswer = Shared<BoxFuture<'static, Result<String, GenerationError>>>;

/// Outcome of asking the cache for an answer.
pub enum AnswerRequest {
    /// Cache hit, available immediately
    Ready(String),
    /// Generation in flight; await to get the shared result
    Pending {
        answer: PendingAnswer,
        origin: AnswerOrigin,
    },
}

impl AnswerRequest {
    pub async fn resolve(self) -> Result<Answer, GenerationError> {
        match self {
            AnswerRequest::Ready(text) => Ok(Answer {
                text,
                origin: AnswerOrigin::Cached,
            }),
            AnswerRequest::Pending { answer, origin } => {
                answer.await.map(|text| Answer { text, origin })
            }
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedAnswer>,
    pending: HashMap<String, PendingAnswer>,
    /// Bumped on clear so late results from a previous note are dropped
    epoch: u64,
}

#[derive(Clone, Default)]
pub struct AnswerCache {
    inner: Arc<Mutex<CacheState>>,
}

impl AnswerCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached raw answer for `question`, if any.
    pub fn get(&self, question: &str) -> Option<String> {
        self.state()
            .entries
            .get(&normalize_question(question))
            .map(|entry| entry.answer.clone())
    }

    pub fn insert(&self, question: &str, answer: impl Into<String>) {
        let key = normalize_question(question);
        self.state().entries.insert(
            key,
            CachedAnswer {
                question: question.trim().to_string(),
                answer: answer.into(),
                generated_at: Utc::now(),
            },
        );
    }

    pub fn is_pending(&self, question: &str) -> bool {
        self.state()
            .pending
            .contains_key(&normalize_question(question))
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Snapshot of all cached answers, oldest first.
    pub fn entries(&self) -> Vec<CachedAnswer> {
        let mut entries: Vec<_> = self.state().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.generated_at);
        entries
    }

    /// Forget everything, including in-flight requests (note switch/reset).
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.pending.clear();
        state.epoch += 1;
    }

    /// Look up `question`, joining or starting a generation on a miss.
    ///
    /// `prompt` is only used when this call starts the generation.
    pub fn request(
        &self,
        question: &str,
        prompt: String,
        generator: Arc<dyn Generator>,
    ) -> AnswerRequest {
        let key = normalize_question(question);
        let mut state = self.state();

        if let Some(entry) = state.entries.get(&key) {
            tracing::debug!(question = %key, "answer cache hit");
            return AnswerRequest::Ready(entry.answer.clone());
        }

        if let Some(pending) = state.pending.get(&key) {
            tracing::debug!(question = %key, "joining in-flight generation");
            return AnswerRequest::Pending {
                answer: pending.clone(),
                origin: AnswerOrigin::Joined,
            };
        }

        tracing::debug!(question = %key, "answer cache miss; generating");
        let weak = Arc::downgrade(&self.inner);
        let epoch = state.epoch;
        let task_key = key.clone();
        let asked = question.trim().to_string();

        let answer = async move {
            let result = AssertUnwindSafe(generator.generate(&prompt))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(key = %task_key, "generator panicked");
                    Err(GenerationError::new("generation task panicked"))
                });
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if state.epoch == epoch {
                    state.pending.remove(&task_key);
                    if let Ok(text) = &result {
                        state.entries.insert(
                            task_key,
                            CachedAnswer {
                                question: asked,
                                answer: text.clone(),
                                generated_at: Utc::now(),
                            },
                        );
                    }
                }
            }
            result
        }
        .boxed()
        .shared();

        state.pending.insert(key, answer.clone());
        AnswerRequest::Pending {
            answer,
            origin: AnswerOrigin::Generated,
        }
    }

    /// Convenience wrapper: request and await in one step.
    pub async fn get_or_generate(
        &self,
        question: &str,
        prompt: String,
        generator: Arc<dyn Generator>,
    ) -> Result<Answer, GenerationError> {
        self.request(question, prompt, generator).resolve().await
    }
}
