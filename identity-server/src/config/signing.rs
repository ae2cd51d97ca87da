use confique::Config;

/// Configuration for the token signing keys
#[derive(Debug, Config, Clone)]
pub struct SigningConfig {
    /// PKCS#8 Ed25519 key file. Loaded when present, otherwise a key is
    /// generated and written there; rotations overwrite it with the new key.
    /// Without a path the key lives in memory only.
    #[config(env = "IDENTITY_SIGNING_KEY_FILE")]
    pub key_file: Option<String>,

    /// Interval between automatic key rotations in seconds, 0 disables rotation (default: 0)
    #[config(env = "IDENTITY_SIGNING_ROTATION_INTERVAL", default = 0)]
    pub rotation_interval: u64,

    /// How long a rotated-out key stays in the published key set in seconds (default: 7200).
    /// Raised at startup and on catalog reload to the longest client access token lifetime.
    #[config(env = "IDENTITY_SIGNING_GRACE_PERIOD", default = 7200)]
    pub grace_period: u64,
}
