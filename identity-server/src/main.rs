mod api;
mod config;
mod grants;
mod headers;
mod issuance;
mod openapi;
mod registry;
mod signing;
mod state;
#[cfg(test)]
mod test_utils;

use crate::state::AppState;
use axum::Router;
use log::{error, info, warn};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable};

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load configuration
    let config = match config::ServerConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    let sweep_interval = config.grants.sweep_interval;
    let rotation_interval = config.signing.rotation_interval;

    // Initialize application state: catalog, signing keys and grant store
    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Issuer {} serving {} clients",
        state.config.oauth.issuer,
        state.registry.snapshot().client_count()
    );

    // Background maintenance, stopped on shutdown
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(grants::run_sweeper(
        state.grants.clone(),
        sweep_interval,
        shutdown.clone(),
    ));
    let rotation = tokio::spawn(signing::run_rotation(
        state.keys.clone(),
        rotation_interval,
        shutdown.clone(),
    ));
    let reloader = tokio::spawn(reload_on_hangup(state.clone(), shutdown.clone()));

    let app = create_app(state).await;

    // Build server address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    // Start server
    let server = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Start the server and wait for it to finish
    info!("Server running on {}, press Ctrl+C to stop", addr);
    let serve = axum::serve(server, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    shutdown.cancel();
    for task in [sweeper, rotation, reloader] {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    if let Err(e) = serve {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("Server shutdown complete");
}

/// Create a new application instance with a given state
pub async fn create_app(state: AppState) -> Router {
    // Create OpenAPI documentation
    let (openapi_router, api_doc) =
        OpenApiRouter::with_openapi(openapi::ApiDoc::openapi()).split_for_parts();

    // Create base router with routes
    Router::new()
        .merge(api::router())
        .merge(openapi_router)
        .merge(Scalar::with_url("/scalar", api_doc))
        .with_state(state)
}

/// Reload the catalog file on SIGHUP. A catalog that fails to load or
/// validate is rejected and the previous one stays active.
#[cfg(unix)]
async fn reload_on_hangup(state: AppState, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to install SIGHUP handler, catalog reload disabled: {}", e);
            return;
        }
    };
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
                match state.reload_catalog() {
                    Ok(clients) => info!("Catalog reloaded with {} clients", clients),
                    Err(e) => error!("Catalog reload failed, keeping the current catalog: {}", e),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_state: AppState, shutdown: CancellationToken) {
    shutdown.cancelled().await;
}

// Simple signal handler that works on all platforms
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
