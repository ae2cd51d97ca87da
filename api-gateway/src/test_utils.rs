use crate::config::GatewayConfig;
use crate::create_app;
use crate::routes::RouteTable;
use crate::state::AppState;
use access_token::{AccessTokenClaims, Jwk, JwkSet, SIGNING_ALGORITHM};
use axum::body::Body;
use axum::Router;
use chrono::Utc;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use log::LevelFilter;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// Signs access tokens the way the identity server does, with a fresh Ed25519 key
pub struct TestIssuer {
    issuer: String,
    encoding: EncodingKey,
    jwk: Jwk,
}

impl TestIssuer {
    pub fn new(issuer: &str) -> Self {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new())
            .expect("Failed to generate key");
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).expect("Failed to parse key");
        Self {
            issuer: issuer.to_string(),
            encoding: EncodingKey::from_ed_der(pkcs8.as_ref()),
            jwk: Jwk::ed25519(pair.public_key().as_ref()),
        }
    }

    /// The key set to publish for this issuer
    pub fn jwks(&self) -> JwkSet {
        JwkSet::new(vec![self.jwk.clone()])
    }

    /// A token for client `postman` valid for `lifetime` seconds (negative means expired)
    pub fn token(&self, scopes: &[&str], lifetime: i64) -> String {
        self.token_for_issuer(&self.issuer, scopes, lifetime)
    }

    pub fn token_for_issuer(&self, issuer: &str, scopes: &[&str], lifetime: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            iss: issuer.to_string(),
            sub: "postman".to_string(),
            aud: vec!["CatalogService".to_string()],
            client_id: "postman".to_string(),
            scope: scopes.iter().map(|s| s.to_string()).collect(),
            exp: now + lifetime,
            iat: now,
            nbf: now,
            jti: format!("jti-{}", now),
        };
        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(self.jwk.kid.clone());
        encode(&header, &claims, &self.encoding).expect("Failed to sign token")
    }
}

fn fixture_routes(upstream: &str) -> String {
    json!({
        "routes": [
            {
                "upstream_path": "/catalog",
                "methods": ["GET"],
                "downstream": upstream,
                "downstream_path": "/api/v1/catalog",
                "required_scope": "CatalogService.read"
            },
            {
                "upstream_path": "/orders/{id}/lines",
                "downstream": upstream,
                "downstream_path": "/api/orders/{id}/lines"
            },
            {
                "upstream_path": "/slow",
                "downstream": upstream,
                "timeout_secs": 1
            },
            {
                "upstream_path": "/flaky",
                "downstream": upstream,
                "timeout_secs": 1,
                "retry": {"max_attempts": 2, "backoff_ms": 10}
            },
            {
                "upstream_path": "/offline",
                "downstream": "http://127.0.0.1:1"
            },
            {
                "upstream_path": "/public",
                "downstream": upstream
            }
        ]
    })
    .to_string()
}

/// Test fixture running the gateway router in memory against mock services.
///
/// `upstream` stands in for every downstream service in the fixture's route
/// table. `identity` publishes the JWKS of `issuer`, so tokens minted with
/// `issuer.token(..)` are accepted by the gateway.
pub struct TestFixture {
    /// The application router
    pub app: Router,
    pub state: AppState,
    /// Mock downstream service
    pub upstream: MockServer,
    /// Mock identity server
    pub identity: MockServer,
    pub issuer: TestIssuer,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let upstream = MockServer::start().await;
        let identity = MockServer::start().await;
        let issuer = TestIssuer::new(&identity.uri());
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/.well-known/openid-configuration/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issuer.jwks()))
            .mount(&identity)
            .await;

        let config = GatewayConfig::for_testing(&identity.uri());
        let routes = RouteTable::from_json(
            &fixture_routes(&upstream.uri()),
            Duration::from_secs(config.upstream.timeout),
        )
        .expect("Failed to build fixture routes");
        let state = AppState::new(config, routes).expect("Failed to create state");
        let app = create_app(state.clone());

        Self {
            app,
            state,
            upstream,
            identity,
            issuer,
        }
    }

    /// Initializes the test logger with the given level
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Sends a GET request to the specified URI.
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, &[], "").await
    }

    /// Sends a GET request carrying `token` as bearer token.
    pub async fn get_with_token(&self, uri: &str, token: &str) -> TestResponse {
        let authorization = format!("Bearer {}", token);
        self.send(
            Method::GET,
            uri,
            &[("authorization", authorization.as_str())],
            "",
        )
        .await
    }

    /// Sends a request with custom headers and body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("Failed to build request");

        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            json,
        }
    }
}

/// Response from a test request
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Raw response body
    pub body: String,
    /// Response body as JSON, or an empty object
    pub json: Value,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {} with body: {}",
            expected, self.status, self.body
        );
        self
    }

    /// Value of a response header, if present
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}
