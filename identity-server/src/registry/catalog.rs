//! The mutable catalog assembled at startup before it is frozen into a [`Registry`](super::Registry)

use super::models::{
    ApiResource, ApiScope, Client, GrantType, IdentityResource, SecretHash, TestUser,
    OFFLINE_ACCESS,
};
use super::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// All registered entities, keyed by their unique names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub(super) clients: BTreeMap<String, Client>,
    pub(super) api_scopes: BTreeMap<String, ApiScope>,
    pub(super) api_resources: BTreeMap<String, ApiResource>,
    pub(super) identity_resources: BTreeMap<String, IdentityResource>,
    pub(super) users: BTreeMap<String, TestUser>,
}

/// On-disk catalog layout: plain lists of every entity kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFile {
    pub clients: Vec<Client>,
    pub api_scopes: Vec<ApiScope>,
    pub api_resources: Vec<ApiResource>,
    pub identity_resources: Vec<IdentityResource>,
    pub users: Vec<TestUser>,
}

fn duplicate(kind: &'static str, name: &str) -> RegistryError {
    RegistryError::DuplicateEntry {
        kind,
        name: name.to_string(),
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&mut self, client: Client) -> Result<(), RegistryError> {
        if self.clients.contains_key(&client.client_id) {
            return Err(duplicate("client", &client.client_id));
        }
        self.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    /// API scopes and identity resources share one namespace
    pub fn register_api_scope(&mut self, scope: ApiScope) -> Result<(), RegistryError> {
        if self.is_scope_name_taken(&scope.name) {
            return Err(duplicate("scope", &scope.name));
        }
        self.api_scopes.insert(scope.name.clone(), scope);
        Ok(())
    }

    pub fn register_api_resource(&mut self, resource: ApiResource) -> Result<(), RegistryError> {
        if self.api_resources.contains_key(&resource.name) {
            return Err(duplicate("api resource", &resource.name));
        }
        self.api_resources.insert(resource.name.clone(), resource);
        Ok(())
    }

    pub fn register_identity_resource(
        &mut self,
        resource: IdentityResource,
    ) -> Result<(), RegistryError> {
        if self.is_scope_name_taken(&resource.name) {
            return Err(duplicate("scope", &resource.name));
        }
        self.identity_resources.insert(resource.name.clone(), resource);
        Ok(())
    }

    pub fn register_test_user(&mut self, user: TestUser) -> Result<(), RegistryError> {
        if self.users.contains_key(&user.username) {
            return Err(duplicate("user", &user.username));
        }
        self.users.insert(user.username.clone(), user);
        Ok(())
    }

    fn is_scope_name_taken(&self, name: &str) -> bool {
        self.api_scopes.contains_key(name) || self.identity_resources.contains_key(name)
    }

    /// Insert every seed entry whose key is not present yet.
    /// Returns the number of inserted entries, so a second run with the same seed yields 0.
    pub fn seed_missing(&mut self, seed: Catalog) -> usize {
        let mut inserted = 0;
        for (id, client) in seed.clients {
            if !self.clients.contains_key(&id) {
                self.clients.insert(id, client);
                inserted += 1;
            }
        }
        for (name, scope) in seed.api_scopes {
            if !self.is_scope_name_taken(&name) {
                self.api_scopes.insert(name, scope);
                inserted += 1;
            }
        }
        for (name, resource) in seed.api_resources {
            if !self.api_resources.contains_key(&name) {
                self.api_resources.insert(name, resource);
                inserted += 1;
            }
        }
        for (name, resource) in seed.identity_resources {
            if !self.is_scope_name_taken(&name) {
                self.identity_resources.insert(name, resource);
                inserted += 1;
            }
        }
        for (name, user) in seed.users {
            if !self.users.contains_key(&name) {
                self.users.insert(name, user);
                inserted += 1;
            }
        }
        inserted
    }

    /// Seed only the entity kinds that are still empty, the way a first start
    /// fills empty tables; populated kinds never receive seed entries.
    /// Seed resources and clients that would refer to scopes the result does
    /// not define are left out.
    pub fn seed_empty_kinds(&mut self, mut seed: Catalog) -> usize {
        if !self.clients.is_empty() {
            seed.clients.clear();
        }
        if !self.api_scopes.is_empty() {
            seed.api_scopes.clear();
        }
        if !self.api_resources.is_empty() {
            seed.api_resources.clear();
        }
        if !self.identity_resources.is_empty() {
            seed.identity_resources.clear();
        }
        if !self.users.is_empty() {
            seed.users.clear();
        }

        let api_scopes: BTreeSet<&String> =
            self.api_scopes.keys().chain(seed.api_scopes.keys()).collect();
        let scopes: BTreeSet<&String> = api_scopes
            .iter()
            .copied()
            .chain(self.identity_resources.keys())
            .chain(seed.identity_resources.keys())
            .collect();
        let resources: Vec<String> = seed
            .api_resources
            .values()
            .filter(|resource| !resource.scopes.iter().all(|s| api_scopes.contains(s)))
            .map(|resource| resource.name.clone())
            .collect();
        let clients: Vec<String> = seed
            .clients
            .values()
            .filter(|client| {
                !client
                    .allowed_scopes
                    .iter()
                    .all(|s| s == OFFLINE_ACCESS || scopes.contains(s))
            })
            .map(|client| client.client_id.clone())
            .collect();
        for name in resources {
            seed.api_resources.remove(&name);
        }
        for id in clients {
            seed.clients.remove(&id);
        }

        self.seed_missing(seed)
    }

    pub fn from_file_contents(file: CatalogFile) -> Result<Self, RegistryError> {
        let mut catalog = Self::new();
        for scope in file.api_scopes {
            catalog.register_api_scope(scope)?;
        }
        for resource in file.identity_resources {
            catalog.register_identity_resource(resource)?;
        }
        for resource in file.api_resources {
            catalog.register_api_resource(resource)?;
        }
        for client in file.clients {
            catalog.register_client(client)?;
        }
        for user in file.users {
            catalog.register_test_user(user)?;
        }
        Ok(catalog)
    }

    /// Load a JSON catalog file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file: CatalogFile =
            serde_json::from_str(&contents).map_err(|e| RegistryError::Parse(e.to_string()))?;
        Self::from_file_contents(file)
    }

    /// Check every cross reference: resource scopes, client scopes and grant type setup
    pub fn validate(&self) -> Result<(), RegistryError> {
        for resource in self.api_resources.values() {
            for scope in &resource.scopes {
                if !self.api_scopes.contains_key(scope) {
                    return Err(RegistryError::UnregisteredScope {
                        owner: resource.name.clone(),
                        scope: scope.clone(),
                    });
                }
            }
        }

        for client in self.clients.values() {
            for scope in &client.allowed_scopes {
                let known = scope == OFFLINE_ACCESS
                    || self.api_scopes.contains_key(scope)
                    || self.identity_resources.contains_key(scope);
                if !known {
                    return Err(RegistryError::UnregisteredScope {
                        owner: client.client_id.clone(),
                        scope: scope.clone(),
                    });
                }
            }

            if client.allowed_grant_types.is_empty() {
                return Err(RegistryError::InvalidClient {
                    client_id: client.client_id.clone(),
                    reason: "no allowed grant types".to_string(),
                });
            }
            if client.allows_grant(GrantType::ClientCredentials) && !client.is_confidential() {
                return Err(RegistryError::InvalidClient {
                    client_id: client.client_id.clone(),
                    reason: "client_credentials requires a secret".to_string(),
                });
            }
            let interactive = client.allows_grant(GrantType::Implicit)
                || client.allows_grant(GrantType::AuthorizationCode);
            if interactive && client.redirect_uris.is_empty() {
                return Err(RegistryError::InvalidClient {
                    client_id: client.client_id.clone(),
                    reason: "interactive grant types require a redirect uri".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The development catalog the server seeds when no other catalog is configured
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        for (name, display) in [
            ("CatalogService.read", "Read access to CatalogService"),
            ("CatalogService.write", "Write access to CatalogService"),
            ("OrderService.read", "Read access to OrderService"),
            ("OrderService.write", "Write access to OrderService"),
        ] {
            catalog
                .api_scopes
                .insert(name.to_string(), ApiScope::new(name, display));
        }

        for (service, description) in [
            ("CatalogService", "Catalog Service API"),
            ("OrderService", "Order Service API"),
        ] {
            catalog.api_resources.insert(
                service.to_string(),
                ApiResource {
                    name: service.to_string(),
                    display_name: description.to_string(),
                    description: description.to_string(),
                    secrets: vec![SecretHash::sha256("ScopeSecret")],
                    scopes: [format!("{service}.read"), format!("{service}.write")]
                        .into_iter()
                        .collect(),
                    user_claims: ["role".to_string()].into_iter().collect(),
                },
            );
        }

        for resource in [
            IdentityResource::openid(),
            IdentityResource::email(),
            IdentityResource::profile(),
            IdentityResource::new("Role", ["role"]),
        ] {
            catalog
                .identity_resources
                .insert(resource.name.clone(), resource);
        }

        let postman = Client {
            client_id: "postman".to_string(),
            client_name: "Postman".to_string(),
            allowed_grant_types: [GrantType::ClientCredentials].into_iter().collect(),
            secrets: vec![SecretHash::sha256("ScopeSecret")],
            allowed_scopes: strings(["CatalogService.read", "OrderService.read"]),
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            allowed_cors_origins: BTreeSet::new(),
            access_token_lifetime: 900,
            allow_access_tokens_via_browser: false,
            require_pkce: false,
        };
        let spa = Client {
            client_id: "AngularSPA".to_string(),
            client_name: "Angular SPA".to_string(),
            allowed_grant_types: [GrantType::Implicit].into_iter().collect(),
            secrets: Vec::new(),
            allowed_scopes: strings(["openid", "profile", "email", "CatalogService.read"]),
            redirect_uris: vec!["http://localhost:4200/signin-oidc".to_string()],
            post_logout_redirect_uris: vec![
                "http://localhost:4200/signout-callback-oidc".to_string()
            ],
            allowed_cors_origins: strings(["http://localhost:4200"]),
            access_token_lifetime: 3600,
            allow_access_tokens_via_browser: true,
            require_pkce: false,
        };
        for client in [postman, spa] {
            catalog.clients.insert(client.client_id.clone(), client);
        }

        let user = TestUser {
            subject_id: "User1".to_string(),
            username: "user1".to_string(),
            password: SecretHash::sha256("1234"),
            claims: [
                ("email".to_string(), "user1@example.com".to_string()),
                ("role".to_string(), "admin".to_string()),
            ]
            .into_iter()
            .collect(),
        };
        catalog.users.insert(user.username.clone(), user);

        catalog
    }

    /// Every requestable scope name: identity resources, API scopes and `offline_access`
    pub fn supported_scopes(&self) -> Vec<String> {
        self.identity_resources
            .keys()
            .chain(self.api_scopes.keys())
            .cloned()
            .chain(std::iter::once(OFFLINE_ACCESS.to_string()))
            .collect()
    }

    /// Claim types of all identity resources and API resources
    pub fn supported_claims(&self) -> BTreeSet<String> {
        self.identity_resources
            .values()
            .flat_map(|resource| resource.user_claims.iter())
            .chain(
                self.api_resources
                    .values()
                    .flat_map(|resource| resource.user_claims.iter()),
            )
            .cloned()
            .collect()
    }

    pub fn client(&self, client_id: &str) -> Option<&Client> {
        self.clients.get(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Longest access token lifetime of any client, in seconds
    pub fn max_access_token_lifetime(&self) -> u64 {
        self.clients
            .values()
            .map(|client| client.access_token_lifetime)
            .max()
            .unwrap_or(0)
    }
}

fn strings<const N: usize>(values: [&str; N]) -> BTreeSet<String> {
    values.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = Catalog::builtin();
        catalog.validate().unwrap();
        assert_eq!(catalog.clients["postman"].access_token_lifetime, 900);
        assert_eq!(catalog.clients["AngularSPA"].access_token_lifetime, 3600);
        assert_eq!(catalog.api_scopes.len(), 4);
        assert_eq!(catalog.identity_resources.len(), 4);
    }

    #[test]
    fn test_supported_scopes_and_claims() {
        let catalog = Catalog::builtin();
        let scopes = catalog.supported_scopes();
        assert!(scopes.contains(&"openid".to_string()));
        assert!(scopes.contains(&"OrderService.write".to_string()));
        assert_eq!(scopes.last().map(String::as_str), Some(OFFLINE_ACCESS));

        let claims = catalog.supported_claims();
        assert!(claims.contains("sub"));
        assert!(claims.contains("role"));
        assert!(claims.contains("email_verified"));
    }

    #[test]
    fn test_duplicate_client_rejected() {
        let mut catalog = Catalog::new();
        let client = Catalog::builtin().clients["postman"].clone();
        catalog.register_client(client.clone()).unwrap();
        let err = catalog.register_client(client).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateEntry { kind: "client", ref name } if name == "postman"
        ));
    }

    #[test]
    fn test_scope_namespace_is_shared() {
        let mut catalog = Catalog::new();
        catalog
            .register_identity_resource(IdentityResource::openid())
            .unwrap();
        let err = catalog
            .register_api_scope(ApiScope::new("openid", "clash"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateEntry { kind: "scope", .. }));
    }

    #[test]
    fn test_seed_missing_is_idempotent() {
        let mut catalog = Catalog::new();
        let first = catalog.seed_missing(Catalog::builtin());
        assert!(first > 0);
        assert_eq!(catalog.seed_missing(Catalog::builtin()), 0);
        assert_eq!(catalog, Catalog::builtin());
    }

    #[test]
    fn test_seed_missing_keeps_existing_entries() {
        let mut catalog = Catalog::new();
        let mut custom = Catalog::builtin().clients["postman"].clone();
        custom.access_token_lifetime = 60;
        catalog.register_client(custom).unwrap();
        catalog.seed_missing(Catalog::builtin());
        assert_eq!(catalog.clients["postman"].access_token_lifetime, 60);
        assert!(catalog.clients.contains_key("AngularSPA"));
    }

    #[test]
    fn test_seed_empty_kinds_leaves_populated_kinds_alone() {
        let mut catalog = Catalog::new();
        catalog
            .register_api_scope(ApiScope::new("Billing.read", "Read billing"))
            .unwrap();
        let mut client = Catalog::builtin().clients["postman"].clone();
        client.client_id = "billing".to_string();
        client.allowed_scopes = ["Billing.read".to_string()].into_iter().collect();
        catalog.register_client(client).unwrap();

        let seeded = catalog.seed_empty_kinds(Catalog::builtin());
        assert!(seeded > 0);
        assert!(!catalog.clients.contains_key("postman"));
        assert!(!catalog.clients.contains_key("AngularSPA"));
        assert!(!catalog.api_scopes.contains_key("CatalogService.read"));
        // Built-in resources own scopes this catalog does not define
        assert!(catalog.api_resources.is_empty());
        assert!(catalog.identity_resources.contains_key("openid"));
        assert!(catalog.validate().is_ok());

        assert_eq!(catalog.seed_empty_kinds(Catalog::builtin()), 0);
    }

    #[test]
    fn test_seed_empty_kinds_on_empty_catalog() {
        let mut catalog = Catalog::new();
        catalog.seed_empty_kinds(Catalog::builtin());
        assert_eq!(catalog, Catalog::builtin());
    }

    #[test]
    fn test_max_access_token_lifetime() {
        assert_eq!(Catalog::builtin().max_access_token_lifetime(), 3600);
        assert_eq!(Catalog::new().max_access_token_lifetime(), 0);
    }

    #[test]
    fn test_validate_unknown_resource_scope() {
        let mut catalog = Catalog::builtin();
        catalog
            .api_resources
            .get_mut("OrderService")
            .unwrap()
            .scopes
            .insert("OrderService.delete".to_string());
        let err = catalog.validate().unwrap_err();
        assert!(matches!(
            err,
            RegistryError::UnregisteredScope { ref owner, ref scope }
                if owner == "OrderService" && scope == "OrderService.delete"
        ));
    }

    #[test]
    fn test_validate_unknown_client_scope() {
        let mut catalog = Catalog::builtin();
        catalog
            .clients
            .get_mut("postman")
            .unwrap()
            .allowed_scopes
            .insert("Billing.read".to_string());
        assert!(matches!(
            catalog.validate(),
            Err(RegistryError::UnregisteredScope { .. })
        ));
    }

    #[test]
    fn test_validate_public_client_credentials_client() {
        let mut catalog = Catalog::builtin();
        catalog.clients.get_mut("postman").unwrap().secrets.clear();
        assert!(matches!(
            catalog.validate(),
            Err(RegistryError::InvalidClient { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "api_scopes": [{{"name": "Billing.read"}}],
                "api_resources": [{{"name": "Billing", "scopes": ["Billing.read"]}}],
                "clients": [{{
                    "client_id": "worker",
                    "allowed_grant_types": ["client_credentials"],
                    "secrets": ["{}"],
                    "allowed_scopes": ["Billing.read"],
                    "access_token_lifetime": 120
                }}]
            }}"#,
            SecretHash::sha256("s3cret").as_str()
        )
        .unwrap();

        let catalog = Catalog::from_file(file.path()).unwrap();
        catalog.validate().unwrap();
        let worker = &catalog.clients["worker"];
        assert!(worker.verify_secret("s3cret"));
        assert_eq!(worker.access_token_lifetime, 120);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            Catalog::from_file("/nonexistent/catalog.json"),
            Err(RegistryError::Io { .. })
        ));
    }

    #[test]
    fn test_from_file_with_duplicates() {
        let file = CatalogFile {
            api_scopes: vec![ApiScope::new("a", ""), ApiScope::new("a", "")],
            ..Default::default()
        };
        assert!(matches!(
            Catalog::from_file_contents(file),
            Err(RegistryError::DuplicateEntry { .. })
        ));
    }
}
