pub mod api;
mod config;
pub mod models;
pub mod providers;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use config::Config;
use providers::{DispatchClient, TaskStore, TokenVerifier, ZoneRegistry};
use services::optimizer::RouteOptimizer;
use services::tracking::TrackingManager;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    tracing::info!(dispatch = %config.dispatch_base_url, "Loaded configuration");

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Collaborator client for auth, task store, and zone registry
    let dispatch = Arc::new(
        DispatchClient::new(config.dispatch_base_url.clone())
            .expect("Failed to build dispatch client"),
    );

    let tracking = Arc::new(TrackingManager::new(
        config.tracking.clone(),
        dispatch.clone() as Arc<dyn TokenVerifier>,
        dispatch.clone() as Arc<dyn TaskStore>,
        dispatch as Arc<dyn ZoneRegistry>,
    ));
    let optimizer = Arc::new(RouteOptimizer::new(config.optimizer.clone()));

    // Start the location batch flush in the background
    let flush_manager = tracking.clone();
    tokio::spawn(async move {
        flush_manager.run_flush_loop().await;
    });

    // Build the app
    let state = AppState {
        tracking,
        optimizer,
    };
    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listen address");

    tracing::info!(addr = %config.bind_addr, "Server running");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Fleettrack API"
}
