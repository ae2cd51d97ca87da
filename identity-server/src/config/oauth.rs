//! OAuth 2.0 / OpenID Connect protocol configuration

use confique::Config;

/// OAuth 2.0 configuration
#[derive(Debug, Config, Clone)]
pub struct OAuthConfig {
    /// Issuer identifier placed in `iss` and served by discovery
    /// (default: http://localhost:5000)
    #[config(env = "IDENTITY_OAUTH_ISSUER", default = "http://localhost:5000")]
    pub issuer: String,

    /// Add `{issuer}/resources` to the audience of every access token (default: true)
    #[config(env = "IDENTITY_OAUTH_EMIT_STATIC_AUDIENCE", default = true)]
    pub emit_static_audience: bool,

    /// Lifetime of identity tokens in seconds (default: 300)
    #[config(env = "IDENTITY_OAUTH_IDENTITY_TOKEN_LIFETIME", default = 300)]
    pub identity_token_lifetime: u64,
}

impl OAuthConfig {
    /// Issuer without a trailing slash, used to build endpoint URLs
    pub fn issuer_base(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    /// Audience added to every access token when `emit_static_audience` is set
    pub fn static_audience(&self) -> String {
        format!("{}/resources", self.issuer_base())
    }
}
