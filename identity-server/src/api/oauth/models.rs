//! OAuth 2.0 request and response bodies

use crate::issuance::{AuthorizeRequest, IssuanceError, IssuedTokens};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Token request (RFC 6749 sections 4.1.3, 4.4.2 and 6), form encoded
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct TokenRequest {
    /// "client_credentials", "authorization_code" or "refresh_token"
    pub grant_type: String,
    /// Client identifier, unless sent with HTTP Basic authentication
    pub client_id: Option<String>,
    /// Client secret, unless sent with HTTP Basic authentication
    pub client_secret: Option<String>,
    /// Requested scopes (space separated)
    pub scope: Option<String>,
    /// Authorization code (authorization_code grant)
    pub code: Option<String>,
    /// Redirect URI used in the authorization request (authorization_code grant)
    pub redirect_uri: Option<String>,
    /// PKCE code verifier (authorization_code grant)
    pub code_verifier: Option<String>,
    /// Refresh token (refresh_token grant)
    pub refresh_token: Option<String>,
}

/// Successful token response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Granted scopes (space separated)
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            token_type: tokens.token_type.to_string(),
            expires_in: tokens.expires_in,
            scope: tokens.scope,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
        }
    }
}

/// OAuth 2.0 error response (RFC 6749 section 5.2)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OAuthError {
    pub error: String,
    pub error_description: String,
}

impl From<&IssuanceError> for OAuthError {
    fn from(error: &IssuanceError) -> Self {
        Self {
            error: error.error_code().to_string(),
            error_description: error.description(),
        }
    }
}

/// Authorization request parameters (RFC 6749 section 4.1.1 and 4.2.1)
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeQuery {
    /// Client identifier
    pub client_id: String,
    /// Registered redirect URI, matched exactly
    pub redirect_uri: String,
    /// "code", "token", "id_token" or "id_token token"
    pub response_type: String,
    /// Requested scopes (space separated)
    pub scope: Option<String>,
    /// Opaque value echoed back to the client
    pub state: Option<String>,
    /// Required when an id_token is requested
    pub nonce: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// PKCE code challenge method, "S256" or "plain"
    pub code_challenge_method: Option<String>,
}

impl AuthorizeQuery {
    pub fn into_request(self, origin: Option<String>) -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: self.client_id,
            redirect_uri: self.redirect_uri,
            response_type: self.response_type,
            scope: self.scope,
            state: self.state,
            nonce: self.nonce,
            code_challenge: self.code_challenge,
            code_challenge_method: self.code_challenge_method,
            origin,
        }
    }
}

/// Login form posted back by the authorization page
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    /// "login" or "deny"
    pub action: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

impl LoginForm {
    pub fn authorize_query(&self) -> AuthorizeQuery {
        AuthorizeQuery {
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            response_type: self.response_type.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
            nonce: self.nonce.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
        }
    }
}
