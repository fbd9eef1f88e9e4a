//! Configuration for Selah
//!
//! All secrets are injected via environment variables at runtime; the
//! environment is read exactly once at startup, validated, and carried in a
//! `Config` that is passed explicitly to every component.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Daily token allocation per plan. Premium is effectively unlimited via a
/// sentinel value.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PlanLimits {
    pub free: i64,
    pub standard: i64,
    pub plus: i64,
    pub premium: i64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            free: 8,
            standard: 20,
            plus: 50,
            premium: 1_000_000_000,
        }
    }
}

/// Generation cost per output language, in tokens.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TokenCosts {
    pub en: i64,
    pub hi: i64,
    pub ml: i64,
}

impl Default for TokenCosts {
    fn default() -> Self {
        Self { en: 10, hi: 20, ml: 20 }
    }
}

/// Which LLM provider is tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

#[derive(Clone)]
pub struct Config {
    /// Port to listen on (default: 8080)
    pub port: u16,

    /// SQLite database URL
    pub db_url: String,

    /// Pool size (default: 10)
    pub database_max_connections: u32,

    /// Signing secret for user bearer tokens
    pub jwt_secret: String,

    /// Signing secret for anonymous-session bearer tokens
    /// (falls back to `jwt_secret` when not set)
    pub anon_jwt_secret: String,

    /// Shared secret for payment-gateway webhook signatures
    pub payments_webhook_secret: String,

    /// Preferred LLM provider; the other becomes the failover when its key
    /// is configured
    pub llm_provider: ProviderKind,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_model: String,

    /// Deterministic mock provider instead of live providers
    pub use_mock: bool,

    /// Base sampling temperature; parse retries step down from here
    pub llm_temperature: f32,

    /// Token cost table, overridable via COSTS_JSON
    pub costs: TokenCosts,

    /// Plan daily limits, overridable via PLAN_LIMITS_JSON
    pub plan_limits: PlanLimits,

    /// Spaced-repetition tuning
    pub max_interval_days: i64,
    pub min_ease_factor: f64,
    pub daily_goal_target: i64,

    /// Allowed CORS origins (comma-separated FRONTEND_ORIGINS)
    pub frontend_origins: Vec<String>,

    /// Payment gateway base URL; unset means mock charges (dev only)
    pub payment_gateway_url: Option<String>,

    /// OAuth code-exchange endpoint and client credentials
    pub oauth_token_url: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,

    /// Keep plaintext inputs on artifacts generated by anonymous sessions
    pub retain_anonymous_inputs: bool,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load and validate configuration from the environment.
    ///
    /// Fails fast when no LLM provider key is configured and mock mode is
    /// off; a deployment without a content source must not come up.
    pub fn from_env() -> Result<Self> {
        let jwt_secret =
            env_opt("JWT_SECRET").context("JWT_SECRET is required")?;
        let anon_jwt_secret = env_opt("ANON_JWT_SECRET").unwrap_or_else(|| jwt_secret.clone());
        let payments_webhook_secret = env_opt("PAYMENTS_WEBHOOK_SECRET")
            .context("PAYMENTS_WEBHOOK_SECRET is required")?;

        let use_mock = std::env::var("USE_MOCK")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let openai_api_key = env_opt("OPENAI_API_KEY");
        let anthropic_api_key = env_opt("ANTHROPIC_API_KEY");

        if !use_mock && openai_api_key.is_none() && anthropic_api_key.is_none() {
            bail!("no LLM provider configured: set OPENAI_API_KEY or ANTHROPIC_API_KEY, or USE_MOCK=true");
        }

        let llm_provider = match std::env::var("LLM_PROVIDER").as_deref() {
            Ok("anthropic") => ProviderKind::Anthropic,
            Ok("openai") | Err(_) => ProviderKind::OpenAi,
            Ok(other) => bail!("unknown LLM_PROVIDER {other:?} (expected openai or anthropic)"),
        };

        let costs = match env_opt("COSTS_JSON") {
            Some(raw) => serde_json::from_str(&raw).context("COSTS_JSON is not valid JSON")?,
            None => TokenCosts::default(),
        };

        let plan_limits = match env_opt("PLAN_LIMITS_JSON") {
            Some(raw) => {
                serde_json::from_str(&raw).context("PLAN_LIMITS_JSON is not valid JSON")?
            }
            None => PlanLimits::default(),
        };

        let frontend_origins = env_opt("FRONTEND_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port: env_parse("PORT", 8080),
            db_url: env_opt("DB_URL").unwrap_or_else(|| "sqlite://selah.db?mode=rwc".to_string()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            jwt_secret,
            anon_jwt_secret,
            payments_webhook_secret,
            llm_provider,
            openai_api_key,
            anthropic_api_key,
            openai_model: env_opt("OPENAI_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            anthropic_model: env_opt("ANTHROPIC_MODEL")
                .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
            use_mock,
            llm_temperature: env_parse("LLM_TEMPERATURE", 0.7_f32),
            costs,
            plan_limits,
            max_interval_days: env_parse("MAX_INTERVAL_DAYS", 180),
            min_ease_factor: env_parse("MIN_EASE_FACTOR", 1.3_f64),
            daily_goal_target: env_parse("DAILY_GOAL_TARGET", 5),
            frontend_origins,
            payment_gateway_url: env_opt("PAYMENT_GATEWAY_URL"),
            oauth_token_url: env_opt("OAUTH_TOKEN_URL"),
            oauth_client_id: env_opt("OAUTH_CLIENT_ID"),
            oauth_client_secret: env_opt("OAUTH_CLIENT_SECRET"),
            retain_anonymous_inputs: std::env::var("RETAIN_ANON_INPUTS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    /// A config suitable for tests: mock provider, in-memory database.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            db_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            jwt_secret: "test-jwt-secret-at-least-32-chars!!".to_string(),
            anon_jwt_secret: "test-anon-secret-at-least-32-char!!".to_string(),
            payments_webhook_secret: "test-webhook-secret".to_string(),
            llm_provider: ProviderKind::OpenAi,
            openai_api_key: None,
            anthropic_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            anthropic_model: "claude-3-5-haiku-latest".to_string(),
            use_mock: true,
            llm_temperature: 0.7,
            costs: TokenCosts::default(),
            plan_limits: PlanLimits::default(),
            max_interval_days: 180,
            min_ease_factor: 1.3,
            daily_goal_target: 5,
            frontend_origins: vec![],
            payment_gateway_url: None,
            oauth_token_url: None,
            oauth_client_id: None,
            oauth_client_secret: None,
            retain_anonymous_inputs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required() {
        std::env::set_var("JWT_SECRET", "secret-secret-secret-secret-1234");
        std::env::set_var("PAYMENTS_WEBHOOK_SECRET", "hook-secret");
        std::env::set_var("USE_MOCK", "true");
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("COSTS_JSON");
        std::env::remove_var("PLAN_LIMITS_JSON");
        std::env::remove_var("LLM_PROVIDER");
    }

    #[test]
    #[serial]
    fn test_mock_mode_allows_missing_keys() {
        set_required();
        let config = Config::from_env().unwrap();
        assert!(config.use_mock);
        assert_eq!(config.costs.en, 10);
        assert_eq!(config.plan_limits.standard, 20);
    }

    #[test]
    #[serial]
    fn test_fail_fast_without_provider_or_mock() {
        set_required();
        std::env::set_var("USE_MOCK", "false");
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_cost_override() {
        set_required();
        std::env::set_var("COSTS_JSON", r#"{"en":5,"hi":15,"ml":25}"#);
        let config = Config::from_env().unwrap();
        assert_eq!(config.costs.en, 5);
        assert_eq!(config.costs.ml, 25);
        std::env::remove_var("COSTS_JSON");
    }

    #[test]
    #[serial]
    fn test_anon_secret_falls_back_to_jwt_secret() {
        set_required();
        std::env::remove_var("ANON_JWT_SECRET");
        let config = Config::from_env().unwrap();
        assert_eq!(config.anon_jwt_secret, config.jwt_secret);
    }
}
