use confique::Config;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Specifies which grant store implementation to use
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GrantStoreKind {
    #[default]
    InMemory,
    Redis,
}

#[derive(Debug)]
pub struct UnknownStoreKind(String);

impl fmt::Display for UnknownStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown grant store '{}', expected 'in-memory' or 'redis'", self.0)
    }
}

impl std::error::Error for UnknownStoreKind {}

impl FromStr for GrantStoreKind {
    type Err = UnknownStoreKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in-memory" => Ok(Self::InMemory),
            "redis" => Ok(Self::Redis),
            other => Err(UnknownStoreKind(other.to_string())),
        }
    }
}

fn parse_store_kind(value: &str) -> Result<GrantStoreKind, UnknownStoreKind> {
    value.parse()
}

/// Configuration for the grant store (authorization codes, refresh tokens, consent)
#[derive(Debug, Config, Clone)]
pub struct GrantStoreConfig {
    /// Grant store type: "in-memory" (default) or "redis"
    #[config(env = "IDENTITY_GRANTS_STORE", parse_env = parse_store_kind, default = "in-memory")]
    pub store: GrantStoreKind,

    /// Redis connection string, required for the redis store
    #[config(env = "IDENTITY_GRANTS_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Authorization code lifetime in seconds (default: 300)
    #[config(env = "IDENTITY_GRANTS_CODE_LIFETIME", default = 300)]
    pub code_lifetime: u64,

    /// Refresh token lifetime in seconds (default: 30 days)
    #[config(env = "IDENTITY_GRANTS_REFRESH_TOKEN_LIFETIME", default = 2592000)]
    pub refresh_token_lifetime: u64,

    /// Consent record lifetime in seconds (default: 30 days)
    #[config(env = "IDENTITY_GRANTS_CONSENT_LIFETIME", default = 2592000)]
    pub consent_lifetime: u64,

    /// Interval between expired grant sweeps in seconds (default: 3600)
    #[config(env = "IDENTITY_GRANTS_SWEEP_INTERVAL", default = 3600)]
    pub sweep_interval: u64,
}
