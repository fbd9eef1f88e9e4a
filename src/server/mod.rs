//! HTTP server: shared state, router, and the response envelope.

mod catalog;
mod memory;
mod session;
mod study;
mod tokens;
mod webhooks;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::oauth::OAuthExchange;
use crate::auth::AuthKeys;
use crate::billing::purchase::PaymentClient;
use crate::config::Config;
use crate::database::Database;
use crate::error::Result;
use crate::guides::coordinator::Generator;
use crate::guides::locks::KeyedLocks;
use crate::llm::LlmGateway;
use crate::tokens::TokenLedger;

/// Everything a request handler needs, constructed once at startup. No
/// process-wide singletons: handlers receive this explicitly through
/// `State`.
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub ledger: TokenLedger,
    pub generator: Generator,
    pub gateway: LlmGateway,
    pub webhook_locks: KeyedLocks,
    pub auth: AuthKeys,
    pub payments: PaymentClient,
    pub oauth: OAuthExchange,
}

impl AppState {
    pub fn build(config: Config, db: Database) -> Arc<Self> {
        let config = Arc::new(config);
        let gateway = LlmGateway::from_config(&config);
        let ledger = TokenLedger::new(db.pool().clone(), config.plan_limits);
        let generator = Generator::new(
            db.pool().clone(),
            config.clone(),
            gateway.clone(),
            ledger.clone(),
            KeyedLocks::new(),
        );

        Arc::new(Self {
            auth: AuthKeys::from_config(&config),
            payments: PaymentClient::new(config.payment_gateway_url.clone()),
            oauth: OAuthExchange::from_config(&config),
            webhook_locks: KeyedLocks::new(),
            gateway,
            ledger,
            generator,
            db,
            config,
        })
    }
}

/// Success envelope: `{"success": true, "data": ...}`.
pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    Json(json!({ "success": true, "data": data }))
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health))
        .route("/study-generate", post(study::generate))
        .route("/study-guides", get(study::list).post(study::save_action))
        .route("/feedback", post(catalog::submit_feedback))
        .route("/topics-recommended", get(catalog::topics_recommended))
        .route("/topics-categories", get(catalog::topics_categories))
        .route("/daily-verse", get(catalog::daily_verse))
        .route("/auth-session", post(session::auth_session))
        .route("/auth-callback", post(session::auth_callback))
        .route("/token-status", get(tokens::token_status))
        .route("/purchase-tokens", post(tokens::purchase_tokens))
        .route("/webhooks/payments", post(webhooks::payments))
        .route("/submit-memory-practice", post(memory::submit_practice))
        .route("/memory-verses", get(memory::list_verses).post(memory::add_verse))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let allow_origin = if config.frontend_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .frontend_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        )
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-session-id"),
            header::HeaderName::from_static("x-anonymous-session-id"),
        ])
        .allow_origin(allow_origin)
}

async fn health(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    let db = state.db.health_check().await;
    Json(json!({
        "status": if db.is_healthy { "healthy" } else { "degraded" },
        "database": db.message,
        "version": crate::VERSION,
        "commit": env!("GIT_COMMIT"),
        "built_at": env!("BUILD_TIME"),
    }))
}

/// Run the HTTP server until shutdown.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let app = router(state.clone());
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
