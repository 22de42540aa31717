use dealer_financing_api::config::Config;
use dealer_financing_api::db::Database;
use dealer_financing_api::handlers::AppState;
use dealer_financing_api::routes::app_router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Initializes tracing, loads configuration, connects to the database (refusing
/// to start on an unmigrated schema), and serves the HTTP routes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dealer_financing_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool; fails fast on missing tables
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established, schema verified");

    let port = config.port;
    let app_state = Arc::new(AppState::new(db.pool.clone(), config)?);
    if app_state.analytics_cache.is_some() {
        tracing::info!(
            "Analytics cache enabled ({}s TTL)",
            app_state.config.analytics_cache_ttl_secs
        );
    }

    let app = app_router(app_state)?;

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer address feeds the per-IP rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
