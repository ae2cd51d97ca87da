pub(crate) mod discovery;
pub(crate) mod health;
pub(crate) mod oauth;

use crate::state::AppState;
use axum::Router;

/// Combines all API routes into a single router
pub(super) fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(discovery::router())
        .merge(oauth::router())
}
