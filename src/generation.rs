//! Answer synthesis through an OpenAI-compatible chat-completions endpoint.
//!
//! Generation is a trait so the engine can run keyless (the disabled
//! implementation fails fast and smart search degrades to retrieval-only).
//! One retry with a short backoff covers transient upstream hiccups; every
//! failure mode maps to `GenerationFailed`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::PipelineError;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAX_COMPLETION_TOKENS: u32 = 512;
const TEMPERATURE: f32 = 0.8;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, PipelineError>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ChatCompletionGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(PipelineError::Config(
                "generation api key must not be empty".into(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
        })
    }

    async fn request_once(&self, prompt: &str) -> Result<String, PipelineError> {
        let payload = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| PipelineError::GenerationFailed(err.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::GenerationFailed(format!(
                "chat endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::GenerationFailed(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PipelineError::GenerationFailed("empty completion".into()))
    }
}

#[async_trait]
impl Generator for ChatCompletionGenerator {
    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        match self.request_once(prompt).await {
            Ok(text) => Ok(text),
            Err(err) => {
                warn!(error = %err, "generation attempt failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                let text = self.request_once(prompt).await?;
                debug!(model = %self.model, "generation recovered on retry");
                Ok(text)
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Stand-in generator for keyless runs. Always fails, which the engine
/// absorbs into a retrieval-only response.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String, PipelineError> {
        Err(PipelineError::GenerationFailed(
            "no generation api key configured".into(),
        ))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_generator_always_fails() {
        let generator = DisabledGenerator;
        let err = generator.complete("무엇이든").await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailed(_)));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = ChatCompletionGenerator::new(
            "https://api.example.com/v1",
            "",
            "test-model",
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
