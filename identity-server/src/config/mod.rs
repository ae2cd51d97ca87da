pub(crate) use crate::config::grants::{GrantStoreConfig, GrantStoreKind};
use crate::config::oauth::OAuthConfig;
use crate::config::signing::SigningConfig;
use confique::Config;

pub mod grants;
pub mod oauth;
pub mod signing;

/// Main configuration structure for the identity server
#[derive(Debug, Config, Clone)]
pub struct ServerConfig {
    /// The port the identity server will listen to (default: 5000)
    #[config(env = "IDENTITY_PORT", default = 5000)]
    pub port: u16,

    /// JSON catalog of clients, scopes, resources and test users
    #[config(env = "IDENTITY_CATALOG_FILE")]
    pub catalog_file: Option<String>,

    /// Insert the built-in catalog entries that are missing from the loaded catalog
    #[config(env = "IDENTITY_SEED_BUILTIN_CATALOG", default = true)]
    pub seed_builtin_catalog: bool,

    /// OAuth 2.0 / OpenID Connect protocol settings
    #[config(nested)]
    pub oauth: OAuthConfig,

    /// Token signing key settings
    #[config(nested)]
    pub signing: SigningConfig,

    /// Grant store settings
    #[config(nested)]
    pub grants: GrantStoreConfig,
}

impl ServerConfig {
    /// Loads the configuration from environment variables, then from the optional
    /// TOML file named by `IDENTITY_CONFIG_FILE` (default: identity-server.toml)
    pub fn new() -> Result<Self, String> {
        let file = std::env::var("IDENTITY_CONFIG_FILE")
            .unwrap_or_else(|_| "identity-server.toml".to_string());
        Self::builder()
            .env()
            .file(file)
            .load()
            .map_err(|e| e.to_string())
    }

    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            port: 0, // Let the OS choose a port
            catalog_file: None,
            seed_builtin_catalog: true,
            oauth: OAuthConfig {
                issuer: "http://localhost:5000".to_string(),
                emit_static_audience: true,
                identity_token_lifetime: 300,
            },
            signing: SigningConfig {
                key_file: None,
                rotation_interval: 0,
                grace_period: 7200,
            },
            grants: GrantStoreConfig {
                store: GrantStoreKind::InMemory,
                redis_url: None,
                code_lifetime: 300,
                refresh_token_lifetime: 2_592_000,
                consent_lifetime: 2_592_000,
                sweep_interval: 3600,
            },
        }
    }
}
