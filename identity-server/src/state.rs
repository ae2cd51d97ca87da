use crate::config::ServerConfig;
use crate::grants::{create_grant_store, GrantStore, GrantStoreBackend};
use crate::issuance::{EngineSettings, TokenEngine};
use crate::registry::{Catalog, Registry};
use crate::signing::SigningKeyProvider;
use log::{info, warn};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub keys: Arc<SigningKeyProvider>,
    pub grants: GrantStore,
    pub engine: Arc<TokenEngine>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Result<Self, std::io::Error> {
        let catalog = load_catalog(&config)?;
        let max_lifetime = catalog.max_access_token_lifetime();
        let registry = Registry::new(catalog).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Invalid catalog: {}", e),
            )
        })?;
        let keys = SigningKeyProvider::load_or_generate(
            config.signing.key_file.as_deref(),
            config.signing.grace_period,
        )
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to load signing key: {}", e),
            )
        })?;
        keys.ensure_grace_period(max_lifetime);
        let grants = create_grant_store(&config.grants).await.map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to create grant store: {}", e),
            )
        })?;

        Ok(Self::assemble(config, registry, keys, grants))
    }

    fn assemble(
        config: ServerConfig,
        registry: Registry,
        keys: SigningKeyProvider,
        grants: GrantStore,
    ) -> Self {
        let registry = Arc::new(registry);
        let keys = Arc::new(keys);
        let engine = TokenEngine::new(
            registry.clone(),
            keys.clone(),
            grants.clone(),
            EngineSettings::from_config(&config),
        );
        Self {
            config: Arc::new(config),
            registry,
            keys,
            grants,
            engine: Arc::new(engine),
        }
    }

    /// Re-read the catalog file and swap it in. Requests in flight keep the old snapshot.
    pub fn reload_catalog(&self) -> Result<usize, std::io::Error> {
        let catalog = load_catalog(&self.config)?;
        let clients = catalog.client_count();
        let max_lifetime = catalog.max_access_token_lifetime();
        self.registry.reload(catalog).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Invalid catalog: {}", e),
            )
        })?;
        self.keys.ensure_grace_period(max_lifetime);
        Ok(clients)
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> bool {
        let grants_healthy = self.grants.health_check().await.is_ok();
        let keys_healthy = !self.keys.public_key_set().is_empty();
        grants_healthy && keys_healthy
    }

    #[cfg(test)]
    pub fn for_testing(config: ServerConfig, catalog: Catalog) -> Self {
        let catalog_max_lifetime = catalog.max_access_token_lifetime();
        let registry = Registry::new(catalog).expect("Test catalog must be valid");
        let keys = SigningKeyProvider::generate(config.signing.grace_period)
            .expect("Failed to generate signing key");
        keys.ensure_grace_period(catalog_max_lifetime);
        let grants = GrantStore::InMemory(crate::grants::memory::InMemoryGrantStore::new());
        Self::assemble(config, registry, keys, grants)
    }
}

/// Load the configured catalog file, falling back to the built-in catalog.
/// When enabled, entity kinds the file leaves empty are filled from the built-in catalog.
fn load_catalog(config: &ServerConfig) -> Result<Catalog, std::io::Error> {
    let Some(path) = config.catalog_file.as_deref() else {
        warn!("No catalog file configured, serving the built-in catalog");
        return Ok(Catalog::builtin());
    };
    let mut catalog = Catalog::from_file(path).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to load catalog: {}", e),
        )
    })?;
    if config.seed_builtin_catalog {
        let seeded = catalog.seed_empty_kinds(Catalog::builtin());
        if seeded > 0 {
            info!("Seeded {} built-in catalog entries", seeded);
        }
    }
    Ok(catalog)
}
