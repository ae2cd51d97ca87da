use confique::Config;

/// Main configuration structure for the gateway
#[derive(Debug, Config, Clone)]
pub struct GatewayConfig {
    /// The port the gateway will listen to (default: 7000)
    #[config(env = "GATEWAY_PORT", default = 7000)]
    pub port: u16,

    /// JSON route file (default: configuration/routes.json)
    #[config(env = "GATEWAY_ROUTES_FILE", default = "configuration/routes.json")]
    pub routes_file: String,

    /// Token validation settings
    #[config(nested)]
    pub identity: IdentityConfig,

    /// Upstream HTTP client settings
    #[config(nested)]
    pub upstream: UpstreamConfig,
}

/// Where and how bearer tokens are validated
#[derive(Debug, Config, Clone)]
pub struct IdentityConfig {
    /// Identity server issuer; tokens must carry it in `iss` (default: http://localhost:5000)
    #[config(env = "GATEWAY_IDENTITY_AUTHORITY", default = "http://localhost:5000")]
    pub authority: String,

    /// JWKS location, defaults to `{authority}/.well-known/openid-configuration/jwks`
    #[config(env = "GATEWAY_IDENTITY_JWKS_URL")]
    pub jwks_url: Option<String>,

    /// Required token audience, if any
    #[config(env = "GATEWAY_IDENTITY_AUDIENCE")]
    pub audience: Option<String>,

    /// How long fetched signing keys are cached, in seconds (default: 300)
    #[config(env = "GATEWAY_IDENTITY_JWKS_CACHE_TTL", default = 300)]
    pub jwks_cache_ttl: u64,

    /// Minimum seconds between refetches triggered by an unknown key id (default: 10)
    #[config(env = "GATEWAY_IDENTITY_JWKS_REFRESH_INTERVAL", default = 10)]
    pub jwks_refresh_interval: u64,

    /// Timeout for fetching the JWKS, in seconds (default: 5)
    #[config(env = "GATEWAY_IDENTITY_JWKS_TIMEOUT", default = 5)]
    pub jwks_timeout: u64,

    /// Clock skew tolerated on token expiry, in seconds (default: 0)
    #[config(env = "GATEWAY_IDENTITY_LEEWAY", default = 0)]
    pub leeway: u64,
}

impl IdentityConfig {
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/.well-known/openid-configuration/jwks",
                self.authority.trim_end_matches('/')
            ),
        }
    }
}

/// Upstream HTTP client settings
#[derive(Debug, Config, Clone)]
pub struct UpstreamConfig {
    /// Timeout for routes that do not set their own, in seconds (default: 30)
    #[config(env = "GATEWAY_UPSTREAM_TIMEOUT", default = 30)]
    pub timeout: u64,

    /// Connect timeout in seconds (default: 2)
    #[config(env = "GATEWAY_UPSTREAM_CONNECT_TIMEOUT", default = 2)]
    pub connect_timeout: u64,

    /// Idle connections kept per upstream host (default: 10)
    #[config(env = "GATEWAY_UPSTREAM_POOL_MAX_IDLE", default = 10)]
    pub pool_max_idle_per_host: usize,

    /// Largest request body forwarded, in bytes (default: 10 MiB)
    #[config(env = "GATEWAY_UPSTREAM_MAX_BODY_BYTES", default = 10485760)]
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    /// Loads the configuration from environment variables, then from the optional
    /// TOML file named by `GATEWAY_CONFIG_FILE` (default: api-gateway.toml)
    pub fn new() -> Result<Self, String> {
        let file =
            std::env::var("GATEWAY_CONFIG_FILE").unwrap_or_else(|_| "api-gateway.toml".to_string());
        Self::builder()
            .env()
            .file(file)
            .load()
            .map_err(|e| e.to_string())
    }

    #[cfg(test)]
    pub fn for_testing(authority: &str) -> Self {
        Self {
            port: 0, // Let the OS choose a port
            routes_file: String::new(),
            identity: IdentityConfig {
                authority: authority.to_string(),
                jwks_url: None,
                audience: None,
                jwks_cache_ttl: 300,
                jwks_refresh_interval: 0,
                jwks_timeout: 2,
                leeway: 0,
            },
            upstream: UpstreamConfig {
                timeout: 5,
                connect_timeout: 1,
                pool_max_idle_per_host: 2,
                max_body_bytes: 1024 * 1024,
            },
        }
    }
}
