use crate::api::{discovery, health, oauth};
use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth 2.0 API";
pub(crate) const DISCOVERY_TAG: &str = "Discovery API";

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::ready_check,
        discovery::discovery_handler,
        discovery::jwks_handler,
        oauth::handlers::token_handler,
        oauth::handlers::authorize_handler,
        oauth::handlers::login_handler,
    ),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Token and authorization endpoints"),
        (name = DISCOVERY_TAG, description = "OpenID Connect discovery and signing keys"),
    ),
    info(
        title = "Identity Server",
        description = "OAuth 2.0 and OpenID Connect authorization server",
        version = "1.0.0"
    )
)]
pub(crate) struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_protocol_endpoints() {
        let doc = ApiDoc::openapi();
        for path in [
            "/connect/token",
            "/connect/authorize",
            "/connect/authorize/login",
            "/.well-known/openid-configuration",
            "/.well-known/openid-configuration/jwks",
            "/health",
            "/ready",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
