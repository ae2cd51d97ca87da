use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod memory;
pub mod redis;

/// Errors that can occur during grant store operations
#[derive(Debug, Error)]
pub enum GrantStoreError {
    #[error("Grant not found")]
    NotFound,
    #[error("Grant has already been consumed")]
    AlreadyConsumed,
    #[error("Grant has expired")]
    Expired,
    #[error("Failed to serialize grant: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Grant store unavailable: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    AuthorizationCode,
    RefreshToken,
    UserConsent,
}

/// A persisted grant: an authorization code, a refresh token or a consent record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub handle: String,
    pub kind: GrantKind,
    pub subject_id: Option<String>,
    pub client_id: String,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Unix time, seconds
    pub created_at: i64,
    /// Unix time, seconds
    pub expires_at: i64,
    #[serde(default)]
    pub consumed: bool,
}

impl Grant {
    pub fn new(
        handle: impl Into<String>,
        kind: GrantKind,
        client_id: impl Into<String>,
        scopes: Vec<String>,
        lifetime_secs: u64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            handle: handle.into(),
            kind,
            subject_id: None,
            client_id: client_id.into(),
            scopes,
            redirect_uri: None,
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
            created_at: now,
            expires_at: now.saturating_add(lifetime_secs as i64),
            consumed: false,
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Seconds left before expiry, at least 1
    pub fn remaining_secs(&self) -> u64 {
        (self.expires_at - chrono::Utc::now().timestamp()).max(1) as u64
    }
}

/// Handle under which the consent of `subject_id` for `client_id` is stored
pub fn consent_handle(subject_id: &str, client_id: &str) -> String {
    format!("consent:{}:{}", subject_id, client_id)
}

/// Contract for grant persistence backends.
///
/// `consume` must hand a grant out at most once, even when several callers
/// race on the same handle.
#[async_trait::async_trait]
pub trait GrantStoreBackend: Send + Sync {
    /// Store a grant, replacing any grant with the same handle
    async fn put(&self, grant: &Grant) -> Result<(), GrantStoreError>;

    /// Fetch a live grant. Expired grants are reported as absent.
    async fn get(&self, handle: &str) -> Result<Option<Grant>, GrantStoreError>;

    /// Atomically mark a grant as used and return it
    async fn consume(&self, handle: &str) -> Result<Grant, GrantStoreError>;

    async fn remove(&self, handle: &str) -> Result<(), GrantStoreError>;

    /// Drop expired grants, returning how many were removed
    async fn sweep_expired(&self) -> Result<usize, GrantStoreError>;

    async fn health_check(&self) -> Result<(), String>;
}

/// Grant store selected at startup from the configuration
#[derive(Clone)]
pub enum GrantStore {
    InMemory(memory::InMemoryGrantStore),
    Redis(redis::RedisGrantStore),
}

#[async_trait::async_trait]
impl GrantStoreBackend for GrantStore {
    async fn put(&self, grant: &Grant) -> Result<(), GrantStoreError> {
        match self {
            Self::InMemory(store) => store.put(grant).await,
            Self::Redis(store) => store.put(grant).await,
        }
    }

    async fn get(&self, handle: &str) -> Result<Option<Grant>, GrantStoreError> {
        match self {
            Self::InMemory(store) => store.get(handle).await,
            Self::Redis(store) => store.get(handle).await,
        }
    }

    async fn consume(&self, handle: &str) -> Result<Grant, GrantStoreError> {
        match self {
            Self::InMemory(store) => store.consume(handle).await,
            Self::Redis(store) => store.consume(handle).await,
        }
    }

    async fn remove(&self, handle: &str) -> Result<(), GrantStoreError> {
        match self {
            Self::InMemory(store) => store.remove(handle).await,
            Self::Redis(store) => store.remove(handle).await,
        }
    }

    async fn sweep_expired(&self) -> Result<usize, GrantStoreError> {
        match self {
            Self::InMemory(store) => store.sweep_expired().await,
            Self::Redis(store) => store.sweep_expired().await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
        }
    }
}

/// Create the grant store named by the configuration
pub async fn create_grant_store(
    config: &crate::config::GrantStoreConfig,
) -> Result<GrantStore, GrantStoreError> {
    match config.store {
        crate::config::GrantStoreKind::InMemory => {
            Ok(GrantStore::InMemory(memory::InMemoryGrantStore::new()))
        }
        crate::config::GrantStoreKind::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| {
                    GrantStoreError::Config("Redis URL is required for the redis grant store".to_string())
                })?;
            let store = redis::RedisGrantStore::new(url)
                .await
                .map_err(GrantStoreError::Config)?;
            Ok(GrantStore::Redis(store))
        }
    }
}

/// Sweep expired grants every `interval_secs` until `shutdown` is cancelled
pub async fn run_sweeper(store: GrantStore, interval_secs: u64, shutdown: CancellationToken) {
    let period = Duration::from_secs(interval_secs.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::debug!("Grant sweeper stopped");
                break;
            }
            _ = interval.tick() => match store.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => log::info!("Swept {} expired grants", removed),
                Err(e) => log::warn!("Grant sweep failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrantStoreConfig, GrantStoreKind};

    fn code(handle: &str, lifetime: u64) -> Grant {
        Grant::new(
            handle,
            GrantKind::AuthorizationCode,
            "AngularSPA",
            vec!["openid".to_string()],
            lifetime,
        )
        .with_subject("User1")
    }

    #[tokio::test]
    async fn test_create_in_memory_store() {
        let config = crate::config::ServerConfig::for_testing().grants;
        let store = create_grant_store(&config).await.unwrap();
        assert!(matches!(store, GrantStore::InMemory(_)));
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_redis_store_without_url() {
        let config = GrantStoreConfig {
            store: GrantStoreKind::Redis,
            redis_url: None,
            ..crate::config::ServerConfig::for_testing().grants
        };
        assert!(matches!(
            create_grant_store(&config).await,
            Err(GrantStoreError::Config(_))
        ));
    }

    #[test]
    fn test_grant_serialization_skips_empty_fields() {
        let json = serde_json::to_value(code("abc", 60)).unwrap();
        assert_eq!(json["kind"], "authorization_code");
        assert_eq!(json["subject_id"], "User1");
        assert!(json.get("nonce").is_none());
    }

    #[test]
    fn test_expiry() {
        let grant = code("abc", 60);
        assert!(!grant.is_expired());
        assert!(grant.is_expired_at(grant.expires_at));
        assert!(grant.remaining_secs() >= 59);
    }

    #[test]
    fn test_consent_handle() {
        assert_eq!(consent_handle("User1", "AngularSPA"), "consent:User1:AngularSPA");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let store = GrantStore::InMemory(memory::InMemoryGrantStore::new());
        let mut expired = code("old", 0);
        expired.expires_at -= 10;
        store.put(&expired).await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(store.clone(), 5, shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(6)).await;
        match &store {
            GrantStore::InMemory(memory) => assert_eq!(memory.len(), 0),
            GrantStore::Redis(_) => unreachable!(),
        }

        shutdown.cancel();
        task.await.unwrap();
    }
}
