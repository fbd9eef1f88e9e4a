//! Principal extraction for Axum handlers
//!
//! Bearer JWTs identify users or anonymous sessions; the anonymous-session
//! header is accepted where a token is absent. `OptionalPrincipal` mints a
//! fresh session on demand for endpoints that allow unauthenticated access,
//! returning the new token so clients can keep using the session.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use uuid::Uuid;

use crate::auth::TokenIdentity;
use crate::error::Error;
use crate::server::AppState;
use crate::sessions::{self, Principal};

/// Header carrying a raw anonymous session id (for clients that have not
/// stored the session token).
pub const ANON_SESSION_HEADER: &str = "x-anonymous-session-id";

/// Extractor: any valid principal, authenticated or anonymous.
#[derive(Debug, Clone, Copy)]
pub struct RequirePrincipal(pub Principal);

/// Extractor: an authenticated user only.
#[derive(Debug, Clone, Copy)]
pub struct RequireUser(pub Uuid);

/// A session minted on demand for an unauthenticated request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MintedSession {
    pub session_id: Uuid,
    pub session_token: String,
}

/// Extractor: principal if credentials are present, otherwise a freshly
/// created anonymous session.
#[derive(Debug, Clone)]
pub struct OptionalPrincipal {
    pub principal: Principal,
    pub minted: Option<MintedSession>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn session_header(parts: &Parts) -> Option<Uuid> {
    parts
        .headers
        .get(ANON_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

/// Resolve credentials in the request to a principal, validating anonymous
/// sessions against the database.
async fn resolve(parts: &Parts, state: &Arc<AppState>) -> Result<Option<Principal>, Error> {
    if let Some(token) = bearer_token(parts) {
        let principal = match state.auth.verify(&token)? {
            TokenIdentity::User(id) => Principal::User(id),
            TokenIdentity::AnonymousSession(id) => {
                sessions::load_active(state.db.pool(), id).await?;
                Principal::Anonymous(id)
            }
        };
        return Ok(Some(principal));
    }

    if let Some(session_id) = session_header(parts) {
        sessions::load_active(state.db.pool(), session_id).await?;
        return Ok(Some(Principal::Anonymous(session_id)));
    }

    Ok(None)
}

#[async_trait]
impl<S> FromRequestParts<S> for RequirePrincipal
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        match resolve(parts, &state).await? {
            Some(principal) => Ok(RequirePrincipal(principal)),
            None => Err(Error::Unauthorized("missing bearer token".into())),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        match resolve(parts, &state).await? {
            Some(Principal::User(id)) => Ok(RequireUser(id)),
            Some(Principal::Anonymous(_)) => {
                Err(Error::Forbidden("a user account is required".into()))
            }
            None => Err(Error::Unauthorized("missing bearer token".into())),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalPrincipal
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        if let Some(principal) = resolve(parts, &state).await? {
            return Ok(OptionalPrincipal {
                principal,
                minted: None,
            });
        }

        // No credentials at all: mint a session so the request can proceed
        let session = sessions::create(state.db.pool(), None).await?;
        let session_token = state.auth.issue_session_token(session.id)?;
        tracing::debug!(session_id = %session.id, "minted session for unauthenticated request");
        Ok(OptionalPrincipal {
            principal: Principal::Anonymous(session.id),
            minted: Some(MintedSession {
                session_id: session.id,
                session_token,
            }),
        })
    }
}
