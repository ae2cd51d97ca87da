mod auth;
mod config;
mod dispatch;
mod errors;
mod health;
mod routes;
mod state;
#[cfg(test)]
mod test_utils;

use crate::routes::RouteTable;
use crate::state::AppState;
use axum::{routing::get, Router};
use log::{error, info};
use std::net::SocketAddr;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load configuration
    let config = match config::GatewayConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;

    // The route table is fixed for the lifetime of the process
    let routes = match RouteTable::from_file(
        &config.routes_file,
        Duration::from_secs(config.upstream.timeout),
    ) {
        Ok(routes) => routes,
        Err(e) => {
            error!("Failed to load routes: {}", e);
            std::process::exit(1);
        }
    };
    if routes.is_empty() {
        error!("Route file {} defines no routes", config.routes_file);
        std::process::exit(1);
    }

    let state = match AppState::new(config, routes) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to create upstream client: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Validating bearer tokens issued by {}",
        state.config.identity.authority
    );

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Gateway running on {}, press Ctrl+C to stop", addr);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("Gateway shutdown complete");
}

/// Gateway router: its own health endpoint, everything else is dispatched
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .fallback(dispatch::dispatch)
        .with_state(state)
}

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
