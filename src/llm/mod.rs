//! LLM gateway: prompt assembly, provider clients, and bounded-retry JSON
//! completion with provider failover.

mod gateway;
mod prompt;
mod provider;

pub use gateway::{LlmGateway, MAX_PARSE_RETRIES};
pub use prompt::{daily_verse_prompt, study_guide_prompt, Prompt, PromptKind};
pub use provider::{
    AnthropicProvider, LlmProvider, MockProvider, OpenAiProvider, ProviderError, Sampling,
};
