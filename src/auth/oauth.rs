//! OAuth callback handling
//!
//! The identity provider is an external collaborator: this module exchanges
//! the authorization code for a profile at the configured token endpoint and
//! maps the e-mail onto a local user row. Mock mode accepts
//! `mock:<email>` codes for development and tests.

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ExchangedIdentity {
    pub email: String,
}

/// Code-exchange client for the configured identity provider.
#[derive(Clone)]
pub struct OAuthExchange {
    http: reqwest::Client,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    use_mock: bool,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    email: Option<String>,
}

impl OAuthExchange {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            token_url: config.oauth_token_url.clone(),
            client_id: config.oauth_client_id.clone(),
            client_secret: config.oauth_client_secret.clone(),
            use_mock: config.use_mock,
        }
    }

    /// Exchange an authorization code for the authenticated identity.
    pub async fn exchange_code(&self, code: &str) -> Result<ExchangedIdentity> {
        if self.use_mock || self.token_url.is_none() {
            let email = code
                .strip_prefix("mock:")
                .filter(|e| e.contains('@'))
                .ok_or_else(|| Error::Unauthorized("invalid authorization code".into()))?;
            return Ok(ExchangedIdentity {
                email: email.to_lowercase(),
            });
        }

        let token_url = self.token_url.as_deref().expect("checked above");
        let response = self
            .http
            .post(token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_deref().unwrap_or_default()),
                (
                    "client_secret",
                    self.client_secret.as_deref().unwrap_or_default(),
                ),
            ])
            .send()
            .await
            .map_err(|e| Error::Unauthorized(format!("code exchange failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%status, "identity provider rejected the code");
            return Err(Error::Unauthorized("authorization code rejected".into()));
        }

        let profile: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| Error::Unauthorized(format!("bad identity response: {e}")))?;

        let email = profile
            .email
            .filter(|e| e.contains('@'))
            .ok_or_else(|| Error::Unauthorized("identity has no usable email".into()))?;

        Ok(ExchangedIdentity {
            email: email.to_lowercase(),
        })
    }
}

/// Find or create the local user for an authenticated e-mail.
pub async fn upsert_user(pool: &SqlitePool, email: &str) -> Result<Uuid> {
    if let Some(id) = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
    {
        return Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("invalid user id: {e}")));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, email, created_at) VALUES ($1, $2, $3) \
         ON CONFLICT (email) DO NOTHING",
    )
    .bind(id.to_string())
    .bind(email)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    // A concurrent signup may have won the insert; read back the winner
    let winner: String = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(pool)
        .await?;
    Uuid::parse_str(&winner).map_err(|e| Error::Internal(format!("invalid user id: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_database;

    #[tokio::test]
    async fn test_mock_exchange_parses_email() {
        let exchange = OAuthExchange::from_config(&Config::for_tests());
        let identity = exchange.exchange_code("mock:Reader@Example.COM").await.unwrap();
        assert_eq!(identity.email, "reader@example.com");

        assert!(exchange.exchange_code("garbage").await.is_err());
        assert!(exchange.exchange_code("mock:not-an-email").await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_user_is_stable_per_email() {
        let db = test_database().await;
        let first = upsert_user(db.pool(), "reader@example.com").await.unwrap();
        let second = upsert_user(db.pool(), "reader@example.com").await.unwrap();
        assert_eq!(first, second);

        let other = upsert_user(db.pool(), "other@example.com").await.unwrap();
        assert_ne!(first, other);
    }
}
