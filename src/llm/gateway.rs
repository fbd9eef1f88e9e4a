//! Completion gateway with bounded parse retries and provider failover
//!
//! Escalation order on a malformed completion: retry the same provider with
//! reduced temperature, then switch provider. Transient provider failures
//! switch immediately. Refusals surface at once.

use std::sync::Arc;

use crate::config::{Config, ProviderKind};
use crate::error::{Error, Result};
use crate::guides::{InputKind, Language, StudyContent};

use super::prompt::{study_guide_prompt, Prompt};
use super::provider::{
    AnthropicProvider, LlmProvider, MockProvider, OpenAiProvider, ProviderError, Sampling,
};

/// Parse retries per provider, beyond the initial attempt.
pub const MAX_PARSE_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct LlmGateway {
    providers: Arc<Vec<Box<dyn LlmProvider>>>,
    sampling: Sampling,
}

impl LlmGateway {
    /// Build the provider chain from configuration: the preferred provider
    /// first, the other as failover when its key is present. Mock mode
    /// replaces the chain entirely.
    pub fn from_config(config: &Config) -> Self {
        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

        if config.use_mock {
            providers.push(Box::new(MockProvider));
        } else {
            let openai = config.openai_api_key.clone().map(|key| {
                Box::new(OpenAiProvider::new(key, config.openai_model.clone()))
                    as Box<dyn LlmProvider>
            });
            let anthropic = config.anthropic_api_key.clone().map(|key| {
                Box::new(AnthropicProvider::new(key, config.anthropic_model.clone()))
                    as Box<dyn LlmProvider>
            });

            let (first, second) = match config.llm_provider {
                ProviderKind::OpenAi => (openai, anthropic),
                ProviderKind::Anthropic => (anthropic, openai),
            };
            providers.extend(first);
            providers.extend(second);
        }

        Self {
            providers: Arc::new(providers),
            sampling: Sampling::new(config.llm_temperature),
        }
    }

    /// Build a gateway over explicit providers (tests).
    pub fn with_providers(providers: Vec<Box<dyn LlmProvider>>, sampling: Sampling) -> Self {
        Self {
            providers: Arc::new(providers),
            sampling,
        }
    }

    /// Generate a validated study guide body.
    pub async fn generate(
        &self,
        input_kind: InputKind,
        raw_input: &str,
        language: Language,
    ) -> Result<StudyContent> {
        let prompt = study_guide_prompt(input_kind, raw_input, language);
        self.complete_with(&prompt, |text| {
            let value = parse_json_object(text)?;
            let content: StudyContent = serde_json::from_value(value)
                .map_err(|e| format!("unexpected shape: {e}"))?;
            content.validate().map_err(|e| e.to_string())?;
            Ok(content)
        })
        .await
    }

    /// Run the retry/failover protocol and return the parsed JSON object.
    pub async fn complete_json(&self, prompt: &Prompt) -> Result<serde_json::Value> {
        self.complete_with(prompt, parse_json_object).await
    }

    async fn complete_with<T>(
        &self,
        prompt: &Prompt,
        parse: impl Fn(&str) -> std::result::Result<T, String>,
    ) -> Result<T> {
        let mut last_transient: Option<String> = None;
        let mut last_parse: Option<String> = None;

        for provider in self.providers.iter() {
            for attempt in 0..=MAX_PARSE_RETRIES {
                let sampling = self.sampling.for_retry(attempt);
                match provider.complete(prompt, &sampling).await {
                    Err(ProviderError::Refused(msg)) => {
                        return Err(Error::LlmRefused(msg));
                    }
                    Err(ProviderError::Transient(msg)) => {
                        tracing::warn!(
                            provider = provider.name(),
                            attempt,
                            "provider failure, switching: {msg}"
                        );
                        last_transient = Some(format!("{}: {msg}", provider.name()));
                        break;
                    }
                    Ok(text) => match parse(&text) {
                        Ok(value) => return Ok(value),
                        Err(msg) => {
                            tracing::warn!(
                                provider = provider.name(),
                                attempt,
                                "malformed completion, retrying: {msg}"
                            );
                            last_parse = Some(msg);
                        }
                    },
                }
            }
        }

        if let Some(msg) = last_parse {
            Err(Error::LlmMalformed(msg))
        } else {
            Err(Error::LlmUnavailable(
                last_transient.unwrap_or_else(|| "no providers configured".to_string()),
            ))
        }
    }
}

/// Extract and parse the JSON object from a completion. Tolerates markdown
/// fences and stray prose around the object, nothing more.
fn parse_json_object(text: &str) -> std::result::Result<serde_json::Value, String> {
    let start = text.find('{').ok_or("no JSON object in completion")?;
    let end = text.rfind('}').ok_or("unterminated JSON object")?;
    if end < start {
        return Err("unterminated JSON object".to_string());
    }
    let value: serde_json::Value =
        serde_json::from_str(&text[start..=end]).map_err(|e| format!("invalid JSON: {e}"))?;
    if !value.is_object() {
        return Err("completion is not a JSON object".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider: pops the next canned result per call.
    struct Scripted {
        name: &'static str,
        outputs: Mutex<Vec<std::result::Result<String, ProviderError>>>,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            outputs: Vec<std::result::Result<String, ProviderError>>,
        ) -> Self {
            Self {
                name,
                outputs: Mutex::new(outputs),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn complete(
            &self,
            _prompt: &Prompt,
            _sampling: &Sampling,
        ) -> std::result::Result<String, ProviderError> {
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                Err(ProviderError::Transient("script exhausted".into()))
            } else {
                outputs.remove(0)
            }
        }
    }

    /// Always returns garbage; records the sampling it saw.
    struct TemperatureProbe {
        temperatures: Arc<Mutex<Vec<f32>>>,
    }

    #[async_trait]
    impl LlmProvider for TemperatureProbe {
        fn name(&self) -> &'static str {
            "probe"
        }

        async fn complete(
            &self,
            _prompt: &Prompt,
            sampling: &Sampling,
        ) -> std::result::Result<String, ProviderError> {
            self.temperatures.lock().unwrap().push(sampling.temperature);
            Ok("garbage".to_string())
        }
    }

    fn valid_study_json() -> String {
        serde_json::json!({
            "summary": "s",
            "interpretation": "i",
            "context": "c",
            "related_verses": ["v"],
            "reflection_questions": ["q"],
            "prayer_points": ["p"]
        })
        .to_string()
    }

    fn prompt() -> Prompt {
        study_guide_prompt(InputKind::Topic, "faith", Language::English)
    }

    #[tokio::test]
    async fn test_malformed_then_valid_retries_same_provider() {
        let gateway = LlmGateway::with_providers(
            vec![Box::new(Scripted::new(
                "a",
                vec![Ok("not json at all".into()), Ok(valid_study_json())],
            ))],
            Sampling::new(0.7),
        );

        let content = gateway.generate(InputKind::Topic, "faith", Language::English).await;
        assert!(content.is_ok());
    }

    #[tokio::test]
    async fn test_retry_temperature_derives_from_initial() {
        let temperatures = Arc::new(Mutex::new(Vec::new()));
        let gateway = LlmGateway::with_providers(
            vec![Box::new(TemperatureProbe {
                temperatures: temperatures.clone(),
            })],
            Sampling::new(0.9),
        );

        let _ = gateway.complete_json(&prompt()).await;

        let seen = temperatures.lock().unwrap();
        assert_eq!(seen.len() as u32, MAX_PARSE_RETRIES + 1);
        assert!((seen[0] - 0.9).abs() < 1e-6);
        assert!((seen[1] - 0.7).abs() < 1e-6);
        assert!((seen[2] - 0.5).abs() < 1e-6);
        assert!((seen[3] - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_transient_fails_over_to_next_provider() {
        let gateway = LlmGateway::with_providers(
            vec![
                Box::new(Scripted::new(
                    "down",
                    vec![Err(ProviderError::Transient("503".into()))],
                )),
                Box::new(Scripted::new("up", vec![Ok(valid_study_json())])),
            ],
            Sampling::new(0.7),
        );

        assert!(gateway.complete_json(&prompt()).await.is_ok());
    }

    #[tokio::test]
    async fn test_all_transient_is_unavailable() {
        let gateway = LlmGateway::with_providers(
            vec![
                Box::new(Scripted::new("a", vec![Err(ProviderError::Transient("x".into()))])),
                Box::new(Scripted::new("b", vec![Err(ProviderError::Transient("y".into()))])),
            ],
            Sampling::new(0.7),
        );

        match gateway.complete_json(&prompt()).await {
            Err(Error::LlmUnavailable(_)) => {}
            other => panic!("expected LlmUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persistent_garbage_is_malformed() {
        let garbage = || {
            (0..=MAX_PARSE_RETRIES)
                .map(|_| Ok("{\"summary\": ".to_string()))
                .collect::<Vec<_>>()
        };
        let gateway = LlmGateway::with_providers(
            vec![
                Box::new(Scripted::new("a", garbage())),
                Box::new(Scripted::new("b", garbage())),
            ],
            Sampling::new(0.7),
        );

        match gateway.complete_json(&prompt()).await {
            Err(Error::LlmMalformed(_)) => {}
            other => panic!("expected LlmMalformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refusal_surfaces_immediately() {
        let gateway = LlmGateway::with_providers(
            vec![
                Box::new(Scripted::new(
                    "a",
                    vec![Err(ProviderError::Refused("policy".into()))],
                )),
                Box::new(Scripted::new("b", vec![Ok(valid_study_json())])),
            ],
            Sampling::new(0.7),
        );

        match gateway.complete_json(&prompt()).await {
            Err(Error::LlmRefused(_)) => {}
            other => panic!("expected LlmRefused, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_fields_count_as_malformed_and_retry() {
        let empty = serde_json::json!({
            "summary": "",
            "interpretation": "i",
            "context": "c",
            "related_verses": ["v"],
            "reflection_questions": ["q"],
            "prayer_points": ["p"]
        })
        .to_string();
        // First attempt fails validation, second is clean
        let gateway = LlmGateway::with_providers(
            vec![Box::new(Scripted::new("a", vec![Ok(empty), Ok(valid_study_json())]))],
            Sampling::new(0.7),
        );

        assert!(gateway
            .generate(InputKind::Topic, "faith", Language::English)
            .await
            .is_ok());
    }

    #[test]
    fn test_parse_tolerates_fenced_output() {
        let fenced = format!("```json\n{}\n```", valid_study_json());
        assert!(parse_json_object(&fenced).is_ok());
        assert!(parse_json_object("no braces here").is_err());
        assert!(parse_json_object("[1, 2]").is_err());
    }
}
