//! Token issuance engine.
//!
//! Runs the grant-type flows behind the token and authorize endpoints. It
//! authenticates clients, checks requested scopes against the registry,
//! keeps codes, refresh tokens and consent in the grant store and signs the
//! resulting JWTs with the current signing key.

mod authorize;
mod error;
pub mod pkce;

pub use authorize::{error_redirect, AuthorizeRequest, ResponseType, ValidatedAuthorize};
pub use error::IssuanceError;

use crate::config::ServerConfig;
use crate::grants::{Grant, GrantKind, GrantStore, GrantStoreBackend};
use crate::registry::{Client, GrantType, Registry, RegistryError, ResolvedScopes};
use crate::signing::{SigningError, SigningKeyProvider};
use access_token::{AccessTokenClaims, SIGNING_ALGORITHM};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{encode, Header};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Issuer and lifetimes the engine works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Issuer URL without trailing slash
    pub issuer: String,
    /// Audience added to every access token, if enabled
    pub static_audience: Option<String>,
    pub identity_token_lifetime: u64,
    pub code_lifetime: u64,
    pub refresh_token_lifetime: u64,
    pub consent_lifetime: u64,
}

impl EngineSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            issuer: config.oauth.issuer_base().to_string(),
            static_audience: config
                .oauth
                .emit_static_audience
                .then(|| config.oauth.static_audience()),
            identity_token_lifetime: config.oauth.identity_token_lifetime,
            code_lifetime: config.grants.code_lifetime,
            refresh_token_lifetime: config.grants.refresh_token_lifetime,
            consent_lifetime: config.grants.consent_lifetime,
        }
    }
}

/// Result of a successful token request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Granted scopes, space separated
    pub scope: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

/// Payload of an OpenID Connect identity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTokenClaims {
    pub iss: String,
    pub sub: String,
    /// The client the token was issued to
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub auth_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// User claims covered by the granted identity resources
    #[serde(flatten)]
    pub claims: BTreeMap<String, String>,
}

/// Split a space separated scope parameter, dropping duplicates but keeping order
pub fn parse_scopes(scope: Option<&str>) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for name in scope.unwrap_or_default().split_whitespace() {
        if !scopes.iter().any(|existing| existing == name) {
            scopes.push(name.to_string());
        }
    }
    scopes
}

/// Opaque handle for codes, refresh tokens and token ids: 256 random bits, base64url
pub fn generate_handle() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct TokenEngine {
    registry: Arc<Registry>,
    keys: Arc<SigningKeyProvider>,
    grants: GrantStore,
    settings: EngineSettings,
}

impl TokenEngine {
    pub fn new(
        registry: Arc<Registry>,
        keys: Arc<SigningKeyProvider>,
        grants: GrantStore,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            keys,
            grants,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Look up the client and check its secret. Public clients need no secret.
    pub fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<Client, IssuanceError> {
        if client_id.is_empty() {
            return Err(IssuanceError::InvalidClient("Missing client_id".to_string()));
        }
        let client = self.registry.lookup_client(client_id).map_err(|_| {
            warn!("Token request from unknown client '{}'", client_id);
            IssuanceError::InvalidClient("Invalid client credentials".to_string())
        })?;
        if client.is_confidential() {
            let valid = client_secret.is_some_and(|secret| client.verify_secret(secret));
            if !valid {
                warn!("Invalid secret presented for client '{}'", client_id);
                return Err(IssuanceError::InvalidClient(
                    "Invalid client credentials".to_string(),
                ));
            }
        }
        Ok(client)
    }

    fn require_grant(client: &Client, grant_type: GrantType) -> Result<(), IssuanceError> {
        if client.allows_grant(grant_type) {
            Ok(())
        } else {
            Err(IssuanceError::UnauthorizedClient(format!(
                "Client '{}' is not allowed to use grant type '{}'",
                client.client_id, grant_type
            )))
        }
    }

    /// Check requested scopes against the client's allowed set and split them by kind
    fn resolve_allowed(
        &self,
        client: &Client,
        scopes: &[String],
    ) -> Result<ResolvedScopes, IssuanceError> {
        if let Some(scope) = scopes.iter().find(|s| !client.allowed_scopes.contains(*s)) {
            return Err(IssuanceError::InvalidScope(format!(
                "Scope '{}' is not allowed for client '{}'",
                scope, client.client_id
            )));
        }
        self.resolve(scopes)
    }

    fn resolve(&self, scopes: &[String]) -> Result<ResolvedScopes, IssuanceError> {
        self.registry.resolve_scopes(scopes).map_err(|e| match e {
            RegistryError::UnknownScope(scope) => {
                IssuanceError::InvalidScope(format!("Unknown scope '{}'", scope))
            }
            other => IssuanceError::InvalidScope(other.to_string()),
        })
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, IssuanceError> {
        let key = self.keys.current_signing_key();
        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(key.kid);
        encode(&header, claims, &key.encoding_key)
            .map_err(|e| IssuanceError::from(SigningError::from(e)))
    }

    /// Sign an access token for `subject`, returning it with its lifetime
    fn mint_access_token(
        &self,
        client: &Client,
        subject: &str,
        scopes: &[String],
        audiences: &BTreeSet<String>,
    ) -> Result<(String, u64), IssuanceError> {
        let now = Utc::now().timestamp();
        let lifetime = client.access_token_lifetime;
        let mut aud: Vec<String> = audiences.iter().cloned().collect();
        if let Some(static_audience) = &self.settings.static_audience {
            if !aud.contains(static_audience) {
                aud.push(static_audience.clone());
            }
        }
        let claims = AccessTokenClaims {
            iss: self.settings.issuer.clone(),
            sub: subject.to_string(),
            aud,
            client_id: client.client_id.clone(),
            scope: scopes.to_vec(),
            exp: now.saturating_add(lifetime as i64),
            iat: now,
            nbf: now,
            jti: generate_handle(),
        };
        let token = self.sign(&claims)?;
        Ok((token, lifetime))
    }

    fn mint_identity_token(
        &self,
        client_id: &str,
        subject: &str,
        nonce: Option<&str>,
        auth_time: i64,
        resolved: &ResolvedScopes,
    ) -> Result<String, IssuanceError> {
        let now = Utc::now().timestamp();
        let wanted = resolved.user_claims();
        let claims: BTreeMap<String, String> = self
            .registry
            .user_by_subject(subject)
            .map(|user| {
                user.claims
                    .into_iter()
                    .filter(|(name, _)| name != "sub" && wanted.contains(name))
                    .collect()
            })
            .unwrap_or_default();
        let token = IdentityTokenClaims {
            iss: self.settings.issuer.clone(),
            sub: subject.to_string(),
            aud: client_id.to_string(),
            exp: now.saturating_add(self.settings.identity_token_lifetime as i64),
            iat: now,
            nbf: now,
            auth_time,
            nonce: nonce.map(str::to_string),
            claims,
        };
        self.sign(&token)
    }

    async fn issue_refresh_token(
        &self,
        client: &Client,
        subject: &str,
        scopes: Vec<String>,
    ) -> Result<String, IssuanceError> {
        let handle = generate_handle();
        let grant = Grant::new(
            &handle,
            GrantKind::RefreshToken,
            &client.client_id,
            scopes,
            self.settings.refresh_token_lifetime,
        )
        .with_subject(subject);
        self.grants.put(&grant).await?;
        Ok(handle)
    }

    /// Client credentials grant (RFC 6749 section 4.4)
    pub async fn client_credentials(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        scope: Option<&str>,
    ) -> Result<IssuedTokens, IssuanceError> {
        let client = self.authenticate_client(client_id, client_secret)?;
        Self::require_grant(&client, GrantType::ClientCredentials)?;

        let mut scopes = parse_scopes(scope);
        if scopes.is_empty() {
            let allowed: Vec<String> = client.allowed_scopes.iter().cloned().collect();
            scopes = self
                .resolve(&allowed)?
                .api_scopes
                .into_iter()
                .map(|scope| scope.name)
                .collect();
            if scopes.is_empty() {
                return Err(IssuanceError::InvalidScope(format!(
                    "Client '{}' has no API scopes",
                    client.client_id
                )));
            }
        }

        let resolved = self.resolve_allowed(&client, &scopes)?;
        if resolved.has_identity_scopes() || resolved.offline_access {
            return Err(IssuanceError::InvalidScope(
                "Identity scopes are not allowed for client_credentials".to_string(),
            ));
        }

        let (access_token, expires_in) =
            self.mint_access_token(&client, &client.client_id, &scopes, &resolved.audiences)?;
        info!(
            "Issued client credentials token to '{}' with scopes [{}]",
            client.client_id,
            scopes.join(" ")
        );
        Ok(IssuedTokens {
            access_token,
            token_type: TOKEN_TYPE_BEARER,
            expires_in,
            scope: scopes.join(" "),
            refresh_token: None,
            id_token: None,
        })
    }

    /// Authorization code redemption (RFC 6749 section 4.1.3)
    pub async fn redeem_code(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        code: Option<&str>,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<IssuedTokens, IssuanceError> {
        let client = self.authenticate_client(client_id, client_secret)?;
        Self::require_grant(&client, GrantType::AuthorizationCode)?;
        let code = code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| IssuanceError::InvalidRequest("Missing code".to_string()))?;
        let redirect_uri = redirect_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| IssuanceError::InvalidRequest("Missing redirect_uri".to_string()))?;

        // Never burn a grant of another kind
        if let Some(existing) = self.grants.get(code).await? {
            if existing.kind != GrantKind::AuthorizationCode {
                return Err(IssuanceError::InvalidGrant("Invalid authorization code".to_string()));
            }
        }

        let grant = self
            .grants
            .consume(code)
            .await
            .map_err(|e| IssuanceError::from_grant_error(e, "authorization code"))?;
        if grant.kind != GrantKind::AuthorizationCode || grant.client_id != client.client_id {
            warn!(
                "Authorization code presented by '{}' was issued to '{}'",
                client.client_id, grant.client_id
            );
            return Err(IssuanceError::InvalidGrant("Invalid authorization code".to_string()));
        }
        if grant.redirect_uri.as_deref() != Some(redirect_uri) {
            return Err(IssuanceError::InvalidGrant(
                "redirect_uri does not match the authorization request".to_string(),
            ));
        }
        if let Some(challenge) = &grant.code_challenge {
            let verifier = code_verifier.ok_or_else(|| {
                IssuanceError::InvalidGrant("Missing code_verifier".to_string())
            })?;
            if !pkce::verify(challenge, grant.code_challenge_method.as_deref(), verifier) {
                return Err(IssuanceError::InvalidGrant("Invalid code_verifier".to_string()));
            }
        }
        let subject = grant
            .subject_id
            .clone()
            .ok_or_else(|| IssuanceError::InvalidGrant("Invalid authorization code".to_string()))?;

        let resolved = self.resolve(&grant.scopes)?;
        let (access_token, expires_in) =
            self.mint_access_token(&client, &subject, &grant.scopes, &resolved.audiences)?;
        let id_token = if resolved.has_openid() {
            Some(self.mint_identity_token(
                &client.client_id,
                &subject,
                grant.nonce.as_deref(),
                grant.created_at,
                &resolved,
            )?)
        } else {
            None
        };
        let refresh_token = if resolved.offline_access && client.allows_grant(GrantType::RefreshToken)
        {
            Some(
                self.issue_refresh_token(&client, &subject, grant.scopes.clone())
                    .await?,
            )
        } else {
            None
        };

        info!(
            "Redeemed authorization code for '{}' via client '{}'",
            subject, client.client_id
        );
        Ok(IssuedTokens {
            access_token,
            token_type: TOKEN_TYPE_BEARER,
            expires_in,
            scope: grant.scopes.join(" "),
            refresh_token,
            id_token,
        })
    }

    /// Refresh token grant (RFC 6749 section 6) with one-time use rotation
    pub async fn refresh(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        refresh_token: Option<&str>,
        scope: Option<&str>,
    ) -> Result<IssuedTokens, IssuanceError> {
        let client = self.authenticate_client(client_id, client_secret)?;
        Self::require_grant(&client, GrantType::RefreshToken)?;
        let handle = refresh_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| IssuanceError::InvalidRequest("Missing refresh_token".to_string()))?;
        let requested = parse_scopes(scope);

        // Reject wrong clients and widened scopes before the token is burned
        if let Some(existing) = self.grants.get(handle).await? {
            check_refresh_grant(&client, &existing)?;
            narrow_scopes(&existing, &requested)?;
        }

        let grant = self
            .grants
            .consume(handle)
            .await
            .map_err(|e| IssuanceError::from_grant_error(e, "refresh token"))?;
        check_refresh_grant(&client, &grant)?;
        let scopes = narrow_scopes(&grant, &requested)?;
        let subject = grant
            .subject_id
            .clone()
            .ok_or_else(|| IssuanceError::InvalidGrant("Invalid refresh token".to_string()))?;

        let resolved = self.resolve(&scopes)?;
        let (access_token, expires_in) =
            self.mint_access_token(&client, &subject, &scopes, &resolved.audiences)?;
        let id_token = if resolved.has_openid() {
            Some(self.mint_identity_token(
                &client.client_id,
                &subject,
                None,
                grant.created_at,
                &resolved,
            )?)
        } else {
            None
        };
        let rotated = self
            .issue_refresh_token(&client, &subject, grant.scopes.clone())
            .await?;

        debug!(
            "Rotated refresh token for '{}' via client '{}'",
            subject, client.client_id
        );
        Ok(IssuedTokens {
            access_token,
            token_type: TOKEN_TYPE_BEARER,
            expires_in,
            scope: scopes.join(" "),
            refresh_token: Some(rotated),
            id_token,
        })
    }

    /// Scopes the user has consented to for a client, if any
    pub async fn consent(
        &self,
        subject_id: &str,
        client_id: &str,
    ) -> Result<Option<Vec<String>>, IssuanceError> {
        let handle = crate::grants::consent_handle(subject_id, client_id);
        Ok(self.grants.get(&handle).await?.map(|grant| grant.scopes))
    }

    async fn record_consent(
        &self,
        client: &Client,
        subject_id: &str,
        scopes: &[String],
    ) -> Result<(), IssuanceError> {
        let handle = crate::grants::consent_handle(subject_id, &client.client_id);
        let mut granted = self
            .grants
            .get(&handle)
            .await?
            .map(|grant| grant.scopes)
            .unwrap_or_default();
        for scope in scopes {
            if !granted.contains(scope) {
                granted.push(scope.clone());
            }
        }
        let grant = Grant::new(
            handle,
            GrantKind::UserConsent,
            &client.client_id,
            granted,
            self.settings.consent_lifetime,
        )
        .with_subject(subject_id);
        self.grants.put(&grant).await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn for_testing(registry: Arc<Registry>) -> (Self, Arc<SigningKeyProvider>) {
        let keys = Arc::new(SigningKeyProvider::generate(3600).unwrap());
        let engine = Self::new(
            registry,
            keys.clone(),
            GrantStore::InMemory(crate::grants::memory::InMemoryGrantStore::new()),
            EngineSettings::from_config(&ServerConfig::for_testing()),
        );
        (engine, keys)
    }
}

fn check_refresh_grant(client: &Client, grant: &Grant) -> Result<(), IssuanceError> {
    if grant.kind != GrantKind::RefreshToken || grant.client_id != client.client_id {
        return Err(IssuanceError::InvalidGrant("Invalid refresh token".to_string()));
    }
    Ok(())
}

/// An empty request keeps the original scopes; anything outside them is rejected
fn narrow_scopes(grant: &Grant, requested: &[String]) -> Result<Vec<String>, IssuanceError> {
    if requested.is_empty() {
        return Ok(grant.scopes.clone());
    }
    if let Some(scope) = requested.iter().find(|s| !grant.scopes.contains(*s)) {
        return Err(IssuanceError::InvalidScope(format!(
            "Scope '{}' was not part of the original grant",
            scope
        )));
    }
    Ok(requested.to_vec())
}
