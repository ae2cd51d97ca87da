//! OpenID Connect discovery document and the published signing keys

use crate::headers::presets;
use crate::openapi::DISCOVERY_TAG;
use crate::registry::GrantType;
use crate::state::AppState;
use access_token::SIGNING_ALGORITHM;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub(crate) const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub(crate) const JWKS_PATH: &str = "/.well-known/openid-configuration/jwks";

/// Discovery responses may be cached by clients for this many seconds
const DISCOVERY_MAX_AGE: u32 = 300;

/// OpenID Provider metadata (OpenID Connect Discovery 1.0, section 3)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

fn strings<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = DISCOVERY_TAG,
    responses(
        (status = 200, description = "OpenID Provider metadata", body = DiscoveryDocument)
    )
)]
pub(crate) async fn discovery_handler(State(state): State<AppState>) -> Response {
    let base = state.config.oauth.issuer_base();
    let catalog = state.registry.snapshot();
    let algorithm = format!("{:?}", SIGNING_ALGORITHM);

    let document = DiscoveryDocument {
        issuer: base.to_string(),
        jwks_uri: format!("{}{}", base, JWKS_PATH),
        authorization_endpoint: format!("{}/connect/authorize", base),
        token_endpoint: format!("{}/connect/token", base),
        scopes_supported: catalog.supported_scopes(),
        claims_supported: catalog.supported_claims().into_iter().collect(),
        grant_types_supported: [
            GrantType::AuthorizationCode,
            GrantType::ClientCredentials,
            GrantType::RefreshToken,
            GrantType::Implicit,
        ]
        .iter()
        .map(|grant| grant.to_string())
        .collect(),
        response_types_supported: strings(["code", "token", "id_token", "id_token token"]),
        response_modes_supported: strings(["query", "fragment"]),
        subject_types_supported: strings(["public"]),
        id_token_signing_alg_values_supported: vec![algorithm],
        token_endpoint_auth_methods_supported: strings(["client_secret_basic", "client_secret_post"]),
        code_challenge_methods_supported: strings(["plain", "S256"]),
    };

    let mut response = (StatusCode::OK, Json(document)).into_response();
    presets::public_cache(DISCOVERY_MAX_AGE).apply(&mut response);
    response
}

#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration/jwks",
    tag = DISCOVERY_TAG,
    responses(
        (status = 200, description = "Public signing keys (RFC 7517)", body = Object)
    )
)]
pub(crate) async fn jwks_handler(State(state): State<AppState>) -> Response {
    let mut response = (StatusCode::OK, Json(state.keys.public_key_set())).into_response();
    presets::public_cache(DISCOVERY_MAX_AGE).apply(&mut response);
    response
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(DISCOVERY_PATH, get(discovery_handler))
        .route(JWKS_PATH, get(jwks_handler))
}
