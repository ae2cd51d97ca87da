use crate::grants::GrantStoreBackend;
use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use utoipa::ToSchema;

const COMPONENT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Represents the health status of a component or the overall service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatusType {
    Ok,
    Error,
}

/// Status of an individual component
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComponentStatus {
    pub status: HealthStatusType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentStatus {
    fn ok() -> Self {
        Self {
            status: HealthStatusType::Ok,
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatusType::Error,
            error: Some(message.into()),
        }
    }
}

/// Health status of individual components
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    pub grant_store: ComponentStatus,
    pub signing_keys: ComponentStatus,
}

/// Readiness response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatusType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatusType::Ok => StatusCode::OK,
            HealthStatusType::Error => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status_code, Json(self)).into_response()
    }
}

async fn check_grant_store(state: &AppState) -> ComponentStatus {
    match timeout(COMPONENT_CHECK_TIMEOUT, state.grants.health_check()).await {
        Ok(Ok(())) => ComponentStatus::ok(),
        Ok(Err(e)) => {
            warn!("Grant store health check failed: {}", e);
            ComponentStatus::error(e)
        }
        Err(_) => {
            warn!("Grant store health check timed out");
            ComponentStatus::error("Health check timed out")
        }
    }
}

fn check_signing_keys(state: &AppState) -> ComponentStatus {
    if state.keys.public_key_set().is_empty() {
        ComponentStatus::error("No signing key published")
    } else {
        ComponentStatus::ok()
    }
}

/// Liveness check handler
#[utoipa::path(
    get,
    path = "/health",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub(crate) async fn health_check() -> HealthResponse {
    HealthResponse {
        status: HealthStatusType::Ok,
        components: None,
    }
}

/// Readiness check handler
#[utoipa::path(
    get,
    path = "/ready",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Service is not ready", body = HealthResponse)
    )
)]
pub(crate) async fn ready_check(State(state): State<AppState>) -> HealthResponse {
    let components = ComponentHealth {
        grant_store: check_grant_store(&state).await,
        signing_keys: check_signing_keys(&state),
    };
    let status = if components.grant_store.status == HealthStatusType::Ok
        && components.signing_keys.status == HealthStatusType::Ok
    {
        HealthStatusType::Ok
    } else {
        HealthStatusType::Error
    };
    HealthResponse {
        status,
        components: Some(components),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}
