use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub routes: usize,
}

/// Liveness of the gateway itself; upstream services are not probed
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        routes: state.routes.len(),
    })
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;
    use http::StatusCode;
    use serde_json::json;
    use wiremock::{matchers, Mock, ResponseTemplate};

    #[tokio::test]
    async fn test_health() {
        let fixture = TestFixture::new().await;

        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fixture.upstream)
            .await;

        let response = fixture.get("/health").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(
            response.json,
            json!({"status": "ok", "routes": fixture.state.routes.len()})
        );

        fixture.upstream.verify().await;
    }
}
