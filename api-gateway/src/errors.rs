use crate::routes::RouteError;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Token lacks the required scope '{0}'")]
    Forbidden(String),

    #[error("Signing keys are unavailable: {0}")]
    KeysUnavailable(String),

    #[error("Request rejected: {0}")]
    BadRequest(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Upstream service is unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream service timed out after {0} seconds")]
    UpstreamTimeout(u64),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Route(RouteError::NoRouteFound { .. }) => StatusCode::NOT_FOUND,
            GatewayError::Route(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::KeysUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// RFC 6750 challenge for token failures
    fn challenge(&self) -> Option<HeaderValue> {
        match self {
            GatewayError::Unauthorized(_) => Some(HeaderValue::from_static(
                r#"Bearer error="invalid_token""#,
            )),
            GatewayError::Forbidden(_) => Some(HeaderValue::from_static(
                r#"Bearer error="insufficient_scope""#,
            )),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status_code(),
            Json(json!({
                "detail": self.to_string(),
            })),
        )
            .into_response();
        if let Some(challenge) = self.challenge() {
            response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_codes() {
        let not_found = GatewayError::from(RouteError::NoRouteFound {
            method: Method::GET,
            path: "/x".to_string(),
        });
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Unauthorized("Missing bearer token".to_string()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Forbidden("CatalogService.read".to_string()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable("refused".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::BadRequest("Path contains dot segments".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::PayloadTooLarge(1024).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::UpstreamTimeout(5).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let response =
            GatewayError::Unauthorized("Missing bearer token".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            r#"Bearer error="invalid_token""#
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"detail": "Missing bearer token"}));
    }
}
