//! Bearer token checks against the identity server's published keys

use crate::config::IdentityConfig;
use crate::errors::GatewayError;
use access_token::{AccessTokenClaims, JwkSet, TokenVerifier, VerifyError};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use log::{debug, info, warn};
use moka::future::Cache as MokaCache;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const JWKS_KEY: &str = "jwks";

/// Caches the identity server's JWKS and verifies bearer tokens with it
pub struct TokenAuthenticator {
    client: reqwest::Client,
    jwks_url: String,
    jwks_timeout: Duration,
    keys: MokaCache<&'static str, Arc<JwkSet>>,
    verifier: TokenVerifier,
    refresh_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
}

impl TokenAuthenticator {
    pub fn new(config: &IdentityConfig, client: reqwest::Client) -> Self {
        let mut verifier = TokenVerifier::new()
            .with_issuer(config.authority.trim_end_matches('/'))
            .with_leeway(config.leeway);
        if let Some(audience) = &config.audience {
            verifier = verifier.with_audience(audience.clone());
        }
        let keys = MokaCache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(config.jwks_cache_ttl.max(1)))
            .build();
        Self {
            client,
            jwks_url: config.jwks_url(),
            jwks_timeout: Duration::from_secs(config.jwks_timeout),
            keys,
            verifier,
            refresh_interval: Duration::from_secs(config.jwks_refresh_interval),
            last_refresh: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<Arc<JwkSet>, GatewayError> {
        debug!("Fetching signing keys from {}", self.jwks_url);
        let response = self
            .client
            .get(&self.jwks_url)
            .timeout(self.jwks_timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| GatewayError::KeysUnavailable(e.to_string()))?;
        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| GatewayError::KeysUnavailable(e.to_string()))?;
        info!("Loaded {} signing keys from {}", keys.keys.len(), self.jwks_url);
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        Ok(Arc::new(keys))
    }

    /// Cached key set; concurrent misses share one fetch
    pub async fn key_set(&self) -> Result<Arc<JwkSet>, GatewayError> {
        self.keys
            .try_get_with(JWKS_KEY, self.fetch())
            .await
            .map_err(|e| e.as_ref().clone())
    }

    /// Drop the cached key set and fetch it again, unless it was fetched recently
    async fn refresh(&self) -> Result<Option<Arc<JwkSet>>, GatewayError> {
        let last = *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.is_some_and(|at| at.elapsed() < self.refresh_interval) {
            return Ok(None);
        }
        self.keys.invalidate(JWKS_KEY).await;
        self.key_set().await.map(Some)
    }

    /// Verify the request's bearer token and check it carries `required_scope`
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        required_scope: &str,
    ) -> Result<AccessTokenClaims, GatewayError> {
        let token = bearer_token(headers)
            .ok_or_else(|| GatewayError::Unauthorized("Missing bearer token".to_string()))?;
        let kid = TokenVerifier::key_id(token).map_err(unauthorized)?;

        let mut keys = self.key_set().await?;
        if keys.find(&kid).is_none() {
            debug!("Unknown signing key '{}', refreshing the key set", kid);
            if let Some(refreshed) = self.refresh().await? {
                keys = refreshed;
            }
        }

        let claims = self.verifier.verify(token, &keys).map_err(unauthorized)?;
        if !claims.has_scope(required_scope) {
            warn!(
                "Client '{}' lacks scope '{}' (has '{}')",
                claims.client_id,
                required_scope,
                claims.scope_string()
            );
            return Err(GatewayError::Forbidden(required_scope.to_string()));
        }
        Ok(claims)
    }
}

fn unauthorized(err: VerifyError) -> GatewayError {
    debug!("Rejected bearer token: {}", err);
    GatewayError::Unauthorized(format!("Invalid bearer token: {}", err))
}

/// The token of an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::test_utils::TestIssuer;
    use http::HeaderValue;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    async fn authenticator(issuer: &TestIssuer, server: &MockServer) -> TokenAuthenticator {
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/.well-known/openid-configuration/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issuer.jwks()))
            .mount(server)
            .await;
        let config = GatewayConfig::for_testing(&server.uri());
        TokenAuthenticator::new(&config.identity, reqwest::Client::new())
    }

    fn headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("abc")), Some("abc"));

        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));
    }

    #[tokio::test]
    async fn test_authorize_valid_token() {
        let server = MockServer::start().await;
        let issuer = TestIssuer::new(&server.uri());
        let auth = authenticator(&issuer, &server).await;

        let token = issuer.token(&["CatalogService.read"], 60);
        let claims = auth
            .authorize(&headers(&token), "CatalogService.read")
            .await
            .unwrap();
        assert_eq!(claims.client_id, "postman");
    }

    #[tokio::test]
    async fn test_authorize_missing_scope_is_forbidden() {
        let server = MockServer::start().await;
        let issuer = TestIssuer::new(&server.uri());
        let auth = authenticator(&issuer, &server).await;

        let token = issuer.token(&["CatalogService.read"], 60);
        let err = auth
            .authorize(&headers(&token), "OrderService.write")
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Forbidden("OrderService.write".to_string()));
    }

    #[tokio::test]
    async fn test_authorize_rejects_bad_tokens() {
        let server = MockServer::start().await;
        let issuer = TestIssuer::new(&server.uri());
        let auth = authenticator(&issuer, &server).await;

        let missing = auth.authorize(&HeaderMap::new(), "CatalogService.read").await;
        assert!(matches!(missing, Err(GatewayError::Unauthorized(_))));

        let garbage = auth.authorize(&headers("not.a.jwt"), "CatalogService.read").await;
        assert!(matches!(garbage, Err(GatewayError::Unauthorized(_))));

        let expired = issuer.token(&["CatalogService.read"], -120);
        let expired = auth.authorize(&headers(&expired), "CatalogService.read").await;
        assert!(matches!(expired, Err(GatewayError::Unauthorized(_))));

        let foreign = TestIssuer::new(&server.uri()).token(&["CatalogService.read"], 60);
        let foreign = auth.authorize(&headers(&foreign), "CatalogService.read").await;
        assert!(matches!(foreign, Err(GatewayError::Unauthorized(_))));

        let token = issuer.token_for_issuer("http://elsewhere", &["CatalogService.read"], 60);
        let wrong_iss = auth.authorize(&headers(&token), "CatalogService.read").await;
        assert!(matches!(wrong_iss, Err(GatewayError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_authority_trailing_slash_is_ignored() {
        let server = MockServer::start().await;
        let issuer = TestIssuer::new(&server.uri());
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/.well-known/openid-configuration/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issuer.jwks()))
            .mount(&server)
            .await;
        let config = GatewayConfig::for_testing(&format!("{}/", server.uri()));
        let auth = TokenAuthenticator::new(&config.identity, reqwest::Client::new());

        let token = issuer.token(&["CatalogService.read"], 60);
        let claims = auth
            .authorize(&headers(&token), "CatalogService.read")
            .await
            .unwrap();
        assert_eq!(claims.iss, server.uri());
    }

    #[tokio::test]
    async fn test_key_set_is_cached() {
        let server = MockServer::start().await;
        let issuer = TestIssuer::new(&server.uri());
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/.well-known/openid-configuration/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issuer.jwks()))
            .expect(1)
            .mount(&server)
            .await;
        let mut config = GatewayConfig::for_testing(&server.uri());
        config.identity.jwks_refresh_interval = 3600;
        let auth = TokenAuthenticator::new(&config.identity, reqwest::Client::new());

        for _ in 0..5 {
            let token = issuer.token(&["CatalogService.read"], 60);
            auth.authorize(&headers(&token), "CatalogService.read")
                .await
                .unwrap();
        }

        server.verify().await;
    }

    #[tokio::test]
    async fn test_unknown_kid_triggers_refresh() {
        let server = MockServer::start().await;
        let old = TestIssuer::new(&server.uri());
        let rotated = TestIssuer::new(&server.uri());

        // First fetch returns only the old key, later fetches the rotated one
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/.well-known/openid-configuration/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(old.jwks()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/.well-known/openid-configuration/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rotated.jwks()))
            .mount(&server)
            .await;
        let config = GatewayConfig::for_testing(&server.uri());
        let auth = TokenAuthenticator::new(&config.identity, reqwest::Client::new());

        let token = old.token(&["CatalogService.read"], 60);
        auth.authorize(&headers(&token), "CatalogService.read")
            .await
            .unwrap();

        let token = rotated.token(&["CatalogService.read"], 60);
        auth.authorize(&headers(&token), "CatalogService.read")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_keys_unavailable() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let issuer = TestIssuer::new(&server.uri());
        let config = GatewayConfig::for_testing(&server.uri());
        let auth = TokenAuthenticator::new(&config.identity, reqwest::Client::new());

        let token = issuer.token(&["CatalogService.read"], 60);
        let err = auth
            .authorize(&headers(&token), "CatalogService.read")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::KeysUnavailable(_)));
    }
}
