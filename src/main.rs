//! SpinBot - Live Roulette Betting Automation Backend
//! Mission: Keep each user's bounded-martingale session alive for hours
//! across expiring credentials and unreliable connections.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spinbot_backend::api::create_router;
use spinbot_backend::auth::{PlatformCredentialProvider, SessionRegistry};
use spinbot_backend::models::Config;
use spinbot_backend::reconcile::HttpRoundFeed;
use spinbot_backend::session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!("🎰 SpinBot backend starting");

    let provider = Arc::new(
        PlatformCredentialProvider::new(
            config.auth_issue_url.clone(),
            Duration::from_secs(config.auth_timeout_secs),
        )
        .context("failed to build credential provider")?,
    );
    let registry = Arc::new(SessionRegistry::new(provider, config.max_renewal_attempts));
    let feed = Arc::new(
        HttpRoundFeed::new(
            config.round_feed_url.clone(),
            Duration::from_secs(config.feed_timeout_secs),
        )
        .context("failed to build round feed client")?,
    );
    let sessions = Arc::new(SessionManager::new(config.clone(), registry, feed));

    let app = create_router(sessions)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 operator API listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Initialize tracing with env-filter overrides
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spinbot_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
