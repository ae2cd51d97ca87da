use serde::{Deserialize, Serialize};

/// Payload of a JWT access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Issuer URL of the identity server
    pub iss: String,
    /// Subject: the user id, or the client id for client-credentials tokens
    pub sub: String,
    /// API resources the token is meant for
    #[serde(default)]
    pub aud: Vec<String>,
    /// Client the token was issued to
    pub client_id: String,
    /// Granted scopes
    #[serde(default)]
    pub scope: Vec<String>,
    /// Expiry (Unix time)
    pub exp: i64,
    /// Issued at (Unix time)
    pub iat: i64,
    /// Not before (Unix time)
    pub nbf: i64,
    /// Unique token identifier
    pub jti: String,
}

impl AccessTokenClaims {
    /// Whether the token carries the given scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|s| s == scope)
    }

    /// Granted scopes in OAuth wire format (space separated)
    pub fn scope_string(&self) -> String {
        self.scope.join(" ")
    }
}
