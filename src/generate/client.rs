use super::models::{Model, Usage};
use super::prompts::ASSISTANT_SYSTEM;
use super::Generator;
use crate::config::Config;
use crate::error::GenerationError;
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenRouter direct API URL
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

/// Response from the model including content and usage stats
#[derive(Debug)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// Generator backed by the OpenRouter chat completions API.
#[derive(Debug, Clone)]
pub struct OpenRouterGenerator {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
    max_tokens: u32,
}

impl OpenRouterGenerator {
    pub fn new(api_key: impl Into<String>, model: Model) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model_id: model.id().to_string(),
            max_tokens: model.max_tokens(),
        }
    }

    /// Build from user config on the given tier. A model named in the config
    /// wins over the tier. `None` when no API key is configured.
    pub fn from_config(config: &Config, tier: Model) -> Option<Self> {
        let api_key = config.api_key()?;
        let mut generator = Self::new(api_key, tier);
        generator.model_id = resolve_model_id(tier, config.model.as_deref());
        Some(generator)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Call the API with retry on rate limits.
    pub async fn complete(&self, system: &str, user: &str) -> anyhow::Result<LlmResponse> {
        let request = ChatRequest {
            model: &self.model_id,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .client
                .post(OPENROUTER_URL)
                .header("Content-Type", "application/json")
                .header("X-Title", "Marginalia")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to parse OpenRouter response: {}\n{}",
                        e,
                        truncate(&text, 300)
                    )
                })?;

                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .unwrap_or_default();

                return Ok(LlmResponse {
                    content,
                    usage: parsed.usage,
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });

                tracing::info!(
                    "OpenRouter rate limited. Retrying in {}s (attempt {}/{})",
                    retry_after,
                    retry_count,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key.".to_string(),
                429 => format!(
                    "Rate limited by OpenRouter after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "OpenRouter server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate(&text, 200)),
            };
            return Err(anyhow::anyhow!("{}", error_msg));
        }
    }
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self.complete(ASSISTANT_SYSTEM, prompt).await?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                tokens = usage.total_tokens,
                cost = usage.cost(),
                "generation complete"
            );
        }
        if response.content.trim().is_empty() {
            return Err(GenerationError::new("model returned an empty answer"));
        }
        Ok(response.content)
    }
}

/// Extract retry-after hint from an OpenRouter error body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

fn resolve_model_id(tier: Model, configured: Option<&str>) -> String {
    match configured.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) => model.to_string(),
        None => tier.id().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_picks_model_unless_configured() {
        assert_eq!(resolve_model_id(Model::Balanced, None), Model::Balanced.id());
        assert_eq!(resolve_model_id(Model::Speed, Some("  ")), Model::Speed.id());
        assert_eq!(resolve_model_id(Model::Balanced, Some("acme/local-7b")), "acme/local-7b");

        let generator = OpenRouterGenerator::new("key", Model::Balanced);
        assert_eq!(generator.model_id(), "anthropic/claude-sonnet-4.5:nitro");
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("Please retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("Retry in: 3s"), Some(3));
        assert_eq!(parse_retry_after("retry after 9000 seconds"), None);
        assert_eq!(parse_retry_after("slow down"), None);
    }

    #[test]
    fn test_request_serializes_messages() {
        let request = ChatRequest {
            model: "m",
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
            max_tokens: 10,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 10);
    }
}
