pub mod handlers;
pub mod models;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Combines the OAuth 2.0 / OpenID Connect protocol endpoints into a single router
pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/connect/token", post(handlers::token_handler))
        .route("/connect/authorize", get(handlers::authorize_handler))
        .route(handlers::LOGIN_PATH, post(handlers::login_handler))
}
