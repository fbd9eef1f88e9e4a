//! Bearer tokens
//!
//! Stateless JWTs: user tokens signed with `JWT_SECRET`, anonymous-session
//! tokens with `ANON_JWT_SECRET`. The two secrets may be identical; the
//! `typ` claim disambiguates. Anonymous tokens expire with their session.

pub mod oauth;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};

const USER_TOKEN_HOURS: i64 = 24 * 7;
const ANON_TOKEN_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    typ: String,
    iat: usize,
    exp: usize,
}

/// Who a verified token identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenIdentity {
    User(Uuid),
    AnonymousSession(Uuid),
}

/// Signing and verification keys, derived once from config.
#[derive(Clone)]
pub struct AuthKeys {
    user_encoding: EncodingKey,
    user_decoding: DecodingKey,
    anon_encoding: EncodingKey,
    anon_decoding: DecodingKey,
}

impl AuthKeys {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            user_decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            anon_encoding: EncodingKey::from_secret(config.anon_jwt_secret.as_bytes()),
            anon_decoding: DecodingKey::from_secret(config.anon_jwt_secret.as_bytes()),
        }
    }

    pub fn issue_user_token(&self, user_id: Uuid) -> Result<String> {
        self.issue(&self.user_encoding, user_id, "user", USER_TOKEN_HOURS)
    }

    pub fn issue_session_token(&self, session_id: Uuid) -> Result<String> {
        self.issue(&self.anon_encoding, session_id, "anon", ANON_TOKEN_HOURS)
    }

    fn issue(
        &self,
        key: &EncodingKey,
        subject: Uuid,
        typ: &str,
        hours: i64,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            typ: typ.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::hours(hours)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, key)
            .map_err(|e| Error::Internal(format!("failed to sign token: {e}")))
    }

    /// Verify a bearer token against both key spaces; the `typ` claim picks
    /// the identity kind.
    pub fn verify(&self, token: &str) -> Result<TokenIdentity> {
        let validation = Validation::default();

        if let Ok(data) = decode::<Claims>(token, &self.user_decoding, &validation) {
            if data.claims.typ == "user" {
                let id = Uuid::parse_str(&data.claims.sub)
                    .map_err(|_| Error::Unauthorized("malformed token subject".into()))?;
                return Ok(TokenIdentity::User(id));
            }
        }

        let data = decode::<Claims>(token, &self.anon_decoding, &validation)
            .map_err(|_| Error::Unauthorized("invalid or expired token".into()))?;
        if data.claims.typ != "anon" {
            return Err(Error::Unauthorized("invalid token type".into()));
        }
        let id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| Error::Unauthorized("malformed token subject".into()))?;
        Ok(TokenIdentity::AnonymousSession(id))
    }
}
