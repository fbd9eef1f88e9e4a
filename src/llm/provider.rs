//! LLM provider clients
//!
//! Each provider is a thin reqwest client behind the `LlmProvider` trait.
//! Transient failures (network, 5xx, timeout) are distinguished from content
//! refusals so the gateway can fail over on the former and surface the
//! latter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::prompt::{Prompt, PromptKind};

/// Per-attempt provider timeout.
pub const ATTEMPT_TIMEOUT_SECS: u64 = 20;

/// Sampling parameters for one completion attempt.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Sampling {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature,
            top_p: 1.0,
            max_tokens: 2048,
        }
    }

    /// Adjusted sampling for a parse retry. Derived from the initial
    /// configuration and the retry count, not cumulatively.
    pub fn for_retry(&self, retry: u32) -> Self {
        Self {
            temperature: (self.temperature - 0.2 * retry as f32).max(0.0),
            top_p: (self.top_p - 0.05 * retry as f32).max(0.5),
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, 5xx, rate limit, or timeout; the gateway fails over.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Content-filter rejection; surfaced to the caller, never retried.
    #[error("provider refused: {0}")]
    Refused(String),
}

/// A text-completion provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(
        &self,
        prompt: &Prompt,
        sampling: &Sampling,
    ) -> std::result::Result<String, ProviderError>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(ATTEMPT_TIMEOUT_SECS))
        .build()
        .expect("reqwest client")
}

fn classify_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Transient("attempt timed out".into())
    } else {
        ProviderError::Transient(format!("request failed: {e}"))
    }
}

// ============================================================================
// OpenAI
// ============================================================================

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            model,
            base_url: "https://api.openai.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        sampling: &Sampling,
    ) -> std::result::Result<String, ProviderError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![
                OpenAiMessage { role: "system", content: &prompt.system },
                OpenAiMessage { role: "user", content: &prompt.user },
            ],
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            response_format: serde_json::json!({ "type": "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transient(format!(
                "openai error ({status}): {body}"
            )));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("bad openai response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Transient("no choices in response".into()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::Refused("content filter triggered".into()));
        }

        choice
            .message
            .content
            .ok_or_else(|| ProviderError::Transient("empty completion".into()))
    }
}

// ============================================================================
// Anthropic
// ============================================================================

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            model,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        sampling: &Sampling,
    ) -> std::result::Result<String, ProviderError> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: sampling.max_tokens,
            system: &prompt.system,
            messages: vec![AnthropicMessage { role: "user", content: &prompt.user }],
            temperature: sampling.temperature,
            top_p: sampling.top_p,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transient(format!(
                "anthropic error ({status}): {body}"
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("bad anthropic response: {e}")))?;

        if parsed.stop_reason.as_deref() == Some("refusal") {
            return Err(ProviderError::Refused("model refused the request".into()));
        }

        let text: String = parsed.content.into_iter().map(|c| c.text).collect();
        if text.is_empty() {
            return Err(ProviderError::Transient("empty completion".into()));
        }
        Ok(text)
    }
}

// ============================================================================
// Mock (USE_MOCK=true and tests)
// ============================================================================

/// Deterministic provider for development and tests: echoes a well-formed
/// JSON object shaped for the prompt kind.
pub struct MockProvider;

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        _sampling: &Sampling,
    ) -> std::result::Result<String, ProviderError> {
        let body = match prompt.kind {
            PromptKind::StudyGuide => serde_json::json!({
                "summary": format!("A short study overview. {}", prompt.user.lines().next().unwrap_or_default()),
                "interpretation": "The passage calls the reader to trust God's character.",
                "context": "Written to believers learning to live out their faith.",
                "related_verses": ["Psalm 23:1", "Romans 8:28"],
                "reflection_questions": [
                    "What does this teach about God?",
                    "What response does it ask of you today?"
                ],
                "prayer_points": ["Gratitude for God's faithfulness", "Courage to obey"]
            }),
            PromptKind::DailyVerse => serde_json::json!({
                "reference": "Lamentations 3:22-23",
                "translations": {
                    "en": "The steadfast love of the Lord never ceases; his mercies never come to an end.",
                    "hi": "यहोवा की करुणा कभी समाप्त नहीं होती, उसकी दया कभी खत्म नहीं होती।",
                    "ml": "യഹോവയുടെ ദയ ഒരിക്കലും തീരുന്നില്ല; അവന്റെ കരുണ ഒരിക്കലും അവസാനിക്കുന്നില്ല."
                }
            }),
        };
        Ok(body.to_string())
    }
}
