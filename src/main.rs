//! Selah server entry point.

use selah::{jobs, server, Config, Database};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "selah=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Environment is read exactly once; a misconfigured deployment fails here
    let config = Config::from_env()?;

    let db = Database::new(&config.db_url, config.database_max_connections)?;
    db.initialize().await?;

    let state = server::AppState::build(config, db);

    tracing::info!(
        version = selah::VERSION,
        provider = state.config.llm_provider.as_str(),
        mock = state.config.use_mock,
        "starting selah"
    );

    // Keep the scheduler alive for the process lifetime
    let _scheduler = jobs::start(state.clone()).await?;

    server::run(state).await?;
    Ok(())
}
