//! Resource registry: the frozen catalog of clients, scopes and resources.
//!
//! The catalog is validated once and published as an immutable snapshot.
//! Readers clone the snapshot `Arc` under a short read lock; [`Registry::reload`]
//! swaps in a new snapshot without disturbing requests holding the old one.

mod catalog;
mod models;

pub use catalog::{Catalog, CatalogFile};
pub use models::{
    ApiResource, ApiScope, Client, GrantType, IdentityResource, SecretHash, TestUser,
    DEFAULT_ACCESS_TOKEN_LIFETIME, OFFLINE_ACCESS, OPENID,
};

use log::info;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Client '{0}' not found")]
    ClientNotFound(String),
    #[error("Unknown scope '{0}'")]
    UnknownScope(String),
    #[error("Duplicate {kind} '{name}'")]
    DuplicateEntry { kind: &'static str, name: String },
    #[error("'{owner}' refers to unregistered scope '{scope}'")]
    UnregisteredScope { owner: String, scope: String },
    #[error("Invalid client '{client_id}': {reason}")]
    InvalidClient { client_id: String, reason: String },
    #[error("Failed to read catalog file '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Failed to parse catalog: {0}")]
    Parse(String),
}

/// Requested scope names split by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedScopes {
    pub api_scopes: Vec<ApiScope>,
    pub identity_resources: Vec<IdentityResource>,
    /// Names of the API resources that own at least one of the API scopes
    pub audiences: BTreeSet<String>,
    pub offline_access: bool,
}

impl ResolvedScopes {
    pub fn has_identity_scopes(&self) -> bool {
        !self.identity_resources.is_empty()
    }

    pub fn has_openid(&self) -> bool {
        self.identity_resources.iter().any(|r| r.name == OPENID)
    }

    /// Claim types covered by the identity resources
    pub fn user_claims(&self) -> BTreeSet<String> {
        self.identity_resources
            .iter()
            .flat_map(|r| r.user_claims.iter().cloned())
            .collect()
    }
}

pub struct Registry {
    snapshot: RwLock<Arc<Catalog>>,
}

impl Registry {
    pub fn new(catalog: Catalog) -> Result<Self, RegistryError> {
        catalog.validate()?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Validate a new catalog and atomically replace the current snapshot.
    /// On error the current snapshot stays in place.
    pub fn reload(&self, catalog: Catalog) -> Result<(), RegistryError> {
        catalog.validate()?;
        let clients = catalog.client_count();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
        info!("Registry reloaded with {} clients", clients);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lookup_client(&self, client_id: &str) -> Result<Client, RegistryError> {
        self.snapshot()
            .clients
            .get(client_id)
            .cloned()
            .ok_or_else(|| RegistryError::ClientNotFound(client_id.to_string()))
    }

    pub fn lookup_scopes<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ApiScope>, RegistryError> {
        let catalog = self.snapshot();
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                catalog
                    .api_scopes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownScope(name.to_string()))
            })
            .collect()
    }

    pub fn resolve_scopes<S: AsRef<str>>(&self, names: &[S]) -> Result<ResolvedScopes, RegistryError> {
        let catalog = self.snapshot();
        let mut resolved = ResolvedScopes::default();
        for name in names {
            let name = name.as_ref();
            if name == OFFLINE_ACCESS {
                resolved.offline_access = true;
            } else if let Some(scope) = catalog.api_scopes.get(name) {
                resolved.api_scopes.push(scope.clone());
                resolved.audiences.extend(
                    catalog
                        .api_resources
                        .values()
                        .filter(|resource| resource.scopes.contains(name))
                        .map(|resource| resource.name.clone()),
                );
            } else if let Some(resource) = catalog.identity_resources.get(name) {
                resolved.identity_resources.push(resource.clone());
            } else {
                return Err(RegistryError::UnknownScope(name.to_string()));
            }
        }
        Ok(resolved)
    }

    pub fn user_by_subject(&self, subject_id: &str) -> Option<TestUser> {
        self.snapshot()
            .users
            .values()
            .find(|user| user.subject_id == subject_id)
            .cloned()
    }

    /// Check a username and password against the test users.
    /// A hash comparison runs even for unknown users.
    pub fn authenticate_user(&self, username: &str, password: &str) -> Option<TestUser> {
        let catalog = self.snapshot();
        match catalog.users.get(username) {
            Some(user) if user.password.matches(password) => Some(user.clone()),
            Some(_) => None,
            None => {
                let _ = SecretHash::sha256("").matches(password);
                None
            }
        }
    }
}
