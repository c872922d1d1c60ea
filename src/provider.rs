//! Completion provider abstraction.
//!
//! HyDE expansion, draft critique, and conversation summarization all
//! consume the same single-method capability: `complete(prompt) -> text`.
//! Transport details stay here; the core never sees HTTP.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::CompletionConfig;
use crate::embedding::post_with_retry;
use crate::error::CoreError;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a completion for a prompt. Errors are recoverable: HyDE
    /// falls back to direct embedding, critique fails open, summarization
    /// surfaces the failure.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub fn create_completion_provider(
    config: &CompletionConfig,
) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "mock" => Ok(Box::new(MockCompletion::default())),
        "api" => Ok(Box::new(ApiCompletion::new(config)?)),
        "disabled" => Ok(Box::new(DisabledCompletion)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

/// Always errors; callers exercise their fallback paths.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(CoreError::ProviderUnavailable("completion provider is disabled".into()).into())
    }
}

/// Offline provider that echoes a clipped form of the prompt. Good enough
/// for tests and for exercising the full pipeline without a model.
#[derive(Default)]
pub struct MockCompletion {
    /// Fixed response override for tests.
    pub canned: Option<String>,
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Some(canned) = &self.canned {
            return Ok(canned.clone());
        }
        let clipped: String = prompt.chars().take(400).collect();
        Ok(format!("Hypothetically: {}", clipped))
    }
}

/// Hosted chat-completions endpoint (`POST {url}/v1/chat/completions`)
/// with bearer auth from `LORE_API_KEY`.
pub struct ApiCompletion {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl ApiCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for api provider"))?;
        let api_key = std::env::var("LORE_API_KEY")
            .map_err(|_| anyhow::anyhow!("LORE_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionProvider for ApiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let json = post_with_retry(
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                CoreError::ProviderUnavailable("completion response missing content".into()).into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes() {
        let provider = MockCompletion::default();
        let text = provider.complete("what is chunking").await.unwrap();
        assert!(text.contains("what is chunking"));
    }

    #[tokio::test]
    async fn test_mock_canned_response() {
        let provider = MockCompletion {
            canned: Some("fixed".into()),
        };
        assert_eq!(provider.complete("anything").await.unwrap(), "fixed");
    }

    #[tokio::test]
    async fn test_disabled_errors() {
        assert!(DisabledCompletion.complete("x").await.is_err());
    }
}
