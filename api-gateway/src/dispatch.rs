use crate::errors::GatewayError;
use crate::routes::Route;
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Request, Response},
    response::IntoResponse,
};
use http::header::{
    HeaderName, CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use http_body_util::LengthLimitError;
use log::{debug, error, warn};
use std::error::Error as StdError;

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

const HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    KEEP_ALIVE,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Route every request through the route table to its upstream service
pub async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Response<Body> {
    match forward(&state, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(state: &AppState, req: Request<Body>) -> Result<Response<Body>, GatewayError> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();
    // Upstream URLs are normalized, so `..` could leave the matched route's prefix
    if has_dot_segment(path) {
        warn!("Rejected {} {}: path contains dot segments", parts.method, path);
        return Err(GatewayError::BadRequest("Path contains dot segments".to_string()));
    }
    let matched = state.routes.match_route(&parts.method, path)?;
    let route = matched.route;

    if let Some(scope) = &route.required_scope {
        let claims = state.auth.authorize(&parts.headers, scope).await?;
        debug!(
            "Client '{}' authorized for {} {}",
            claims.client_id, parts.method, path
        );
    }

    let limit = state.config.upstream.max_body_bytes;
    let body = to_bytes(body, limit).await.map_err(|e| body_error(e, limit))?;
    let url = route.target_url(path, &matched.captures, parts.uri.query());
    debug!(
        "Forwarding {} {} to {} (route '{}')",
        parts.method,
        path,
        url,
        route.pattern.as_str()
    );

    let headers = strip_hop_by_hop(&parts.headers, true);
    let upstream = send(state, route, &parts.method, &url, headers, body).await?;

    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers(), false);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| upstream_error(route, &url, e))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// True when a path segment is `.` or `..`, literally or percent-encoded
fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let segment = segment.to_ascii_lowercase().replace("%2e", ".");
        segment == "." || segment == ".."
    })
}

fn body_error(e: axum::Error, limit: usize) -> GatewayError {
    let inner = e.into_inner();
    if inner.downcast_ref::<LengthLimitError>().is_some() {
        GatewayError::PayloadTooLarge(limit)
    } else {
        GatewayError::BadRequest(inner.to_string())
    }
}

/// Send the request, retrying connect failures and timeouts per the route's policy
async fn send(
    state: &AppState,
    route: &Route,
    method: &Method,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, GatewayError> {
    let attempts = route.retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut request = state
            .client
            .request(method.clone(), url)
            .headers(headers.clone())
            .timeout(route.timeout);
        if !body.is_empty() {
            request = request.body(body.clone());
        }

        match request.send().await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < attempts && (e.is_connect() || e.is_timeout()) => {
                warn!(
                    "Attempt {}/{} to {} failed, retrying: {}",
                    attempt, attempts, url, e
                );
                tokio::time::sleep(route.retry.backoff()).await;
                attempt += 1;
            }
            Err(e) => return Err(upstream_error(route, url, e)),
        }
    }
}

fn upstream_error(route: &Route, url: &str, e: reqwest::Error) -> GatewayError {
    error!(
        "Upstream request failed: {}\nURL: {}\nSource error: {:?}",
        e,
        url,
        e.source()
    );
    if e.is_timeout() {
        GatewayError::UpstreamTimeout(route.timeout.as_secs())
    } else {
        GatewayError::UpstreamUnavailable(e.to_string())
    }
}

/// Copy headers, leaving out hop-by-hop ones and any named by `Connection`
fn strip_hop_by_hop(headers: &HeaderMap, request: bool) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name)
            || (request && *name == HOST)
            || listed.iter().any(|l| l == name.as_str())
        {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}
