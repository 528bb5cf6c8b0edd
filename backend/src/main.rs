use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mesai_sayac_backend::config::CorsConfig;
use mesai_sayac_backend::{logging, routes, AppState, Config, Provider, SupabaseClient};

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.origins.trim() == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Mesai Sayaç API");

    let provider: Arc<dyn Provider> = Arc::new(SupabaseClient::new(&config.provider));
    tracing::info!("Using provider at {}", config.provider.url);

    let state = Arc::new(AppState::new(config.clone(), provider));
    state.session.start();

    // Build router
    let app = routes::router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), logging::request_logger))
        .layer(cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.session.shutdown();
    Ok(())
}
