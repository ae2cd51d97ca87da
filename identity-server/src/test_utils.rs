use crate::config::ServerConfig;
use crate::create_app;
use crate::registry::Catalog;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use http::{header, HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::ServiceExt;
use url::form_urlencoded;

/// Test fixture running the complete identity server router in memory.
///
/// The fixture uses an in-memory grant store and an ephemeral signing key, so
/// every test starts from a clean slate.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture
///         .post_form(
///             "/connect/token",
///             &[
///                 ("grant_type", "client_credentials"),
///                 ("client_id", "postman"),
///                 ("client_secret", "ScopeSecret"),
///             ],
///         )
///         .await;
///
///     response.assert_ok();
///     assert_eq!(response.json["token_type"], "Bearer");
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Shared application state, for inspecting keys and grants
    pub state: AppState,
}

impl TestFixture {
    /// Creates a fixture serving the built-in catalog
    pub async fn new() -> Self {
        Self::with_catalog(Catalog::builtin()).await
    }

    /// Creates a fixture serving the given catalog
    pub async fn with_catalog(catalog: Catalog) -> Self {
        Self::with_config(ServerConfig::for_testing(), catalog).await
    }

    /// Creates a fixture with custom settings
    pub async fn with_config(config: ServerConfig, catalog: Catalog) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let state = AppState::for_testing(config, catalog);
        let app = create_app(state.clone()).await;

        Self { app, state }
    }

    /// Initializes the test logger with the given level
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder().method(method).uri(uri.as_ref())
    }

    /// Sends a GET request to the specified URI.
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        self.get_with_headers(uri, &[]).await
    }

    /// Sends a GET request with custom headers.
    pub async fn get_with_headers(
        &self,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = self.request_builder(Method::GET, uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a form encoded POST request.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let response = fixture
    ///     .post_form("/connect/authorize/login", &[("username", "user1")])
    ///     .await;
    /// ```
    pub async fn post_form(&self, uri: impl AsRef<str>, fields: &[(&str, &str)]) -> TestResponse {
        self.post_form_with_headers(uri, fields, &[]).await
    }

    /// Sends a form encoded POST request with custom headers.
    pub async fn post_form_with_headers(
        &self,
        uri: impl AsRef<str>,
        fields: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let mut builder = self
            .request_builder(Method::POST, uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(body))
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a request and returns a TestResponse.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
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

        // Non JSON bodies (HTML pages, redirects) leave an empty object here
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            json,
        }
    }
}

/// Response from a test request that provides convenient access to status, headers and body.
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw response body
    pub body: String,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {} with body: {}",
            expected, self.status, self.body
        );
        self
    }

    /// A shorthand for `assert_status(StatusCode::OK)`.
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Converts the response body to the specified type.
    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response body")
    }

    /// Value of a response header, if present
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The `Location` header of a redirect
    pub fn location(&self) -> &str {
        self.header("location").expect("Response has no Location header")
    }

    /// Parameters carried by the redirect location, in the fragment when present,
    /// otherwise in the query
    pub fn redirect_params(&self) -> Vec<(String, String)> {
        let location = self.location();
        let encoded = match location.split_once('#') {
            Some((_, fragment)) => fragment,
            None => location.split_once('?').map(|(_, query)| query).unwrap_or(""),
        };
        form_urlencoded::parse(encoded.as_bytes())
            .into_owned()
            .collect()
    }

    /// Single redirect parameter by name
    pub fn redirect_param(&self, name: &str) -> Option<String> {
        self.redirect_params()
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}
