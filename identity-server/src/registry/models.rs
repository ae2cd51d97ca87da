//! Catalog entities: clients, API scopes, API resources, identity resources and test users

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Scope that lets a client obtain refresh tokens
pub const OFFLINE_ACCESS: &str = "offline_access";

/// Identity resource required for OpenID Connect requests
pub const OPENID: &str = "openid";

/// Default access token lifetime in seconds (1 hour)
pub const DEFAULT_ACCESS_TOKEN_LIFETIME: u64 = 3600;

/// OAuth 2.0 grant types a client may be allowed to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    Implicit,
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Implicit => "implicit",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "implicit" => Ok(GrantType::Implicit),
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(other.to_string()),
        }
    }
}

/// A stored secret: base64 encoded SHA-256 of the plain text.
/// Comparison is constant time over the hashes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHash(String);

impl SecretHash {
    pub fn sha256(plain: &str) -> Self {
        Self(STANDARD.encode(Sha256::digest(plain.as_bytes())))
    }

    /// Wrap an already hashed value, as found in catalog files
    pub fn from_hashed(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, presented: &str) -> bool {
        let presented = Self::sha256(presented);
        self.0.as_bytes().ct_eq(presented.0.as_bytes()).into()
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHash(***)")
    }
}

fn default_access_token_lifetime() -> u64 {
    DEFAULT_ACCESS_TOKEN_LIFETIME
}

/// A registered OAuth client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub allowed_grant_types: BTreeSet<GrantType>,
    /// Secret hashes; a client without secrets is public
    #[serde(default)]
    pub secrets: Vec<SecretHash>,
    #[serde(default)]
    pub allowed_scopes: BTreeSet<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default)]
    pub allowed_cors_origins: BTreeSet<String>,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: u64,
    /// Whether access tokens may be handed to the browser (implicit flow)
    #[serde(default)]
    pub allow_access_tokens_via_browser: bool,
    #[serde(default)]
    pub require_pkce: bool,
}

impl Client {
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant_type)
    }

    pub fn is_confidential(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Check a presented secret against every stored hash.
    /// All hashes are compared so the timing does not reveal which one matched.
    pub fn verify_secret(&self, presented: &str) -> bool {
        self.secrets
            .iter()
            .fold(false, |matched, secret| secret.matches(presented) | matched)
    }

    /// Redirect URIs are compared exactly, no prefix or wildcard matching
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_cors_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/').eq_ignore_ascii_case(origin))
    }
}

/// A scope exposed by an API resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiScope {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

impl ApiScope {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
        }
    }
}

/// A protected API, the audience of access tokens carrying its scopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResource {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub secrets: Vec<SecretHash>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub user_claims: BTreeSet<String>,
}

/// A named group of user claims requestable as a scope (openid, profile, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResource {
    pub name: String,
    #[serde(default)]
    pub user_claims: BTreeSet<String>,
}

impl IdentityResource {
    pub fn new<I, S>(name: impl Into<String>, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            user_claims: claims.into_iter().map(Into::into).collect(),
        }
    }

    pub fn openid() -> Self {
        Self::new(OPENID, ["sub"])
    }

    pub fn email() -> Self {
        Self::new("email", ["email", "email_verified"])
    }

    pub fn profile() -> Self {
        Self::new(
            "profile",
            [
                "name",
                "family_name",
                "given_name",
                "middle_name",
                "nickname",
                "preferred_username",
                "profile",
                "picture",
                "website",
                "gender",
                "birthdate",
                "zoneinfo",
                "locale",
                "updated_at",
            ],
        )
    }
}

/// An in-memory user for development setups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUser {
    pub subject_id: String,
    pub username: String,
    pub password: SecretHash,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client {
            client_id: "spa".to_string(),
            client_name: "SPA".to_string(),
            allowed_grant_types: [GrantType::Implicit].into_iter().collect(),
            secrets: vec![SecretHash::sha256("first"), SecretHash::sha256("second")],
            allowed_scopes: BTreeSet::new(),
            redirect_uris: vec!["http://localhost:4200/signin-oidc".to_string()],
            post_logout_redirect_uris: Vec::new(),
            allowed_cors_origins: ["http://localhost:4200".to_string()].into_iter().collect(),
            access_token_lifetime: 3600,
            allow_access_tokens_via_browser: true,
            require_pkce: false,
        }
    }

    #[test]
    fn test_secret_hash_matches() {
        let secret = SecretHash::sha256("ScopeSecret");
        assert!(secret.matches("ScopeSecret"));
        assert!(!secret.matches("scopesecret"));
        assert!(!secret.matches(""));
    }

    #[test]
    fn test_secret_hash_is_base64_sha256() {
        // sha256("") in base64
        assert_eq!(
            SecretHash::sha256(""),
            SecretHash::from_hashed("47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=")
        );
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", SecretHash::sha256("x")), "SecretHash(***)");
    }

    #[test]
    fn test_verify_any_secret() {
        let client = client();
        assert!(client.verify_secret("first"));
        assert!(client.verify_secret("second"));
        assert!(!client.verify_secret("third"));
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let client = client();
        assert!(client.has_redirect_uri("http://localhost:4200/signin-oidc"));
        assert!(!client.has_redirect_uri("http://localhost:4200/signin-oidc/"));
        assert!(!client.has_redirect_uri("http://localhost:4200/signin-oidc?x=1"));
        assert!(!client.has_redirect_uri("http://evil.example/cb"));
    }

    #[test]
    fn test_allows_origin() {
        let client = client();
        assert!(client.allows_origin("http://localhost:4200"));
        assert!(client.allows_origin("http://LOCALHOST:4200/"));
        assert!(!client.allows_origin("http://localhost:4300"));
    }

    #[test]
    fn test_grant_type_round_trip() {
        for grant_type in [
            GrantType::ClientCredentials,
            GrantType::Implicit,
            GrantType::AuthorizationCode,
            GrantType::RefreshToken,
        ] {
            assert_eq!(grant_type.as_str().parse::<GrantType>(), Ok(grant_type));
        }
        assert_eq!("password".parse::<GrantType>(), Err("password".to_string()));
    }

    #[test]
    fn test_client_defaults_from_json() {
        let client: Client = serde_json::from_value(serde_json::json!({
            "client_id": "svc",
            "allowed_grant_types": ["client_credentials"],
        }))
        .unwrap();
        assert_eq!(client.access_token_lifetime, DEFAULT_ACCESS_TOKEN_LIFETIME);
        assert!(!client.is_confidential());
        assert!(client.allows_grant(GrantType::ClientCredentials));
        assert!(!client.allows_grant(GrantType::Implicit));
    }
}
