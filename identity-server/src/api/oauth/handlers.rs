use super::models::{AuthorizeQuery, LoginForm, OAuthError, TokenRequest, TokenResponse};
use crate::headers::presets;
use crate::issuance::{error_redirect, AuthorizeRequest, IssuanceError, ResponseType, ValidatedAuthorize};
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{Form, Query, State},
    http::{
        header::{AUTHORIZATION, ORIGIN, WWW_AUTHENTICATE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, error, info, warn};
use url::{form_urlencoded, Url};

pub(super) const LOGIN_PATH: &str = "/connect/authorize/login";

/// Issue tokens for the client credentials, authorization code and refresh token grants
#[utoipa::path(
    post,
    path = "/connect/token",
    tag = OAUTH_TAG,
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    params(
        ("Authorization" = Option<String>, Header, description = "HTTP Basic client credentials"),
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request, grant or scope", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError),
        (status = 503, description = "Grant store unavailable", body = OAuthError)
    )
)]
pub(crate) async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    let basic = basic_credentials(&headers);
    let (client_id, client_secret) = match &basic {
        Some((id, secret)) => (id.clone(), Some(secret.clone())),
        None => (
            request.client_id.clone().unwrap_or_default(),
            request.client_secret.clone(),
        ),
    };
    debug!(
        "Token request from client '{}' with grant_type '{}'",
        client_id, request.grant_type
    );

    let engine = &state.engine;
    let result = match request.grant_type.as_str() {
        "client_credentials" => {
            engine
                .client_credentials(&client_id, client_secret.as_deref(), request.scope.as_deref())
                .await
        }
        "authorization_code" => {
            engine
                .redeem_code(
                    &client_id,
                    client_secret.as_deref(),
                    request.code.as_deref(),
                    request.redirect_uri.as_deref(),
                    request.code_verifier.as_deref(),
                )
                .await
        }
        "refresh_token" => {
            engine
                .refresh(
                    &client_id,
                    client_secret.as_deref(),
                    request.refresh_token.as_deref(),
                    request.scope.as_deref(),
                )
                .await
        }
        "" => Err(IssuanceError::InvalidRequest(
            "Missing grant_type".to_string(),
        )),
        other => Err(IssuanceError::UnsupportedGrantType(format!(
            "Grant type '{}' is not supported",
            other
        ))),
    };

    match result {
        Ok(tokens) => {
            info!(
                "Issued tokens to client '{}' for scope '{}'",
                client_id, tokens.scope
            );
            let mut response = (StatusCode::OK, Json(TokenResponse::from(tokens))).into_response();
            presets::no_store().apply(&mut response);
            response
        }
        Err(err) => {
            warn!("Token request from client '{}' failed: {}", client_id, err);
            let mut response = oauth_error_response(&err);
            if basic.is_some() && matches!(err, IssuanceError::InvalidClient(_)) {
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
            }
            response
        }
    }
}

/// Validate an authorization request and show the login page
#[utoipa::path(
    get,
    path = "/connect/authorize",
    tag = OAUTH_TAG,
    params(AuthorizeQuery),
    responses(
        (status = 200, description = "Login page", content_type = "text/html"),
        (status = 303, description = "Error sent back to the client's redirect URI"),
        (status = 400, description = "Unknown client or redirect URI", body = OAuthError)
    )
)]
pub(crate) async fn authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let request = query.into_request(header_value(&headers, ORIGIN));
    match state.engine.validate_authorize(&request) {
        Ok(validated) => login_page(&request, &validated, None),
        Err(err) => authorize_error(&request, err),
    }
}

/// Authenticate the user and complete the authorization request
#[utoipa::path(
    post,
    path = "/connect/authorize/login",
    tag = OAUTH_TAG,
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Login page with an error message", content_type = "text/html"),
        (status = 303, description = "Tokens, code or error sent back to the client's redirect URI"),
        (status = 400, description = "Unknown client or redirect URI", body = OAuthError)
    )
)]
pub(crate) async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    // The login page posts from our own origin, which is not a client origin
    let origin = header_value(&headers, ORIGIN)
        .filter(|origin| !is_own_origin(&state.config.oauth.issuer, origin));
    let request = form.authorize_query().into_request(origin);
    let validated = match state.engine.validate_authorize(&request) {
        Ok(validated) => validated,
        Err(err) => return authorize_error(&request, err),
    };

    if form.action == "deny" {
        info!("User denied authorization for client '{}'", request.client_id);
        return authorize_error(
            &request,
            IssuanceError::AccessDenied("The user denied the request".to_string()),
        );
    }

    let Some(user) = state
        .registry
        .authenticate_user(&form.username, &form.password)
    else {
        info!("Failed login attempt for user '{}'", form.username);
        return login_page(&request, &validated, Some("Invalid username or password"));
    };

    match state.engine.authorize(&validated, &user).await {
        Ok(location) => {
            info!(
                "User '{}' authorized client '{}' ({})",
                user.subject_id,
                validated.client.client_id,
                validated.response_type.as_str()
            );
            Redirect::to(&location).into_response()
        }
        Err(err) => {
            error!("Failed to complete authorization: {}", err);
            authorize_error(&request, err)
        }
    }
}

fn oauth_error_response(err: &IssuanceError) -> Response {
    let mut response = (err.status_code(), Json(OAuthError::from(err))).into_response();
    presets::no_store().apply(&mut response);
    response
}

/// Errors about the client or redirect URI are shown to the user, everything
/// else goes back to the client's redirect URI
fn authorize_error(request: &AuthorizeRequest, err: IssuanceError) -> Response {
    if err.is_untrusted_redirect() {
        warn!(
            "Rejected authorization request for client '{}': {}",
            request.client_id, err
        );
        let mut response = (StatusCode::BAD_REQUEST, Json(OAuthError::from(&err))).into_response();
        presets::no_store().apply(&mut response);
        return response;
    }
    debug!(
        "Authorization request for client '{}' failed: {}",
        request.client_id, err
    );
    let response_type = ResponseType::parse(&request.response_type).ok();
    let location = error_redirect(
        &request.redirect_uri,
        response_type,
        &err,
        request.state.as_deref(),
    );
    Redirect::to(&location).into_response()
}

fn header_value(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn is_own_origin(issuer: &str, origin: &str) -> bool {
    Url::parse(issuer)
        .map(|url| url.origin().ascii_serialization() == origin.trim_end_matches('/'))
        .unwrap_or(false)
}

/// `Authorization: Basic` credentials, each part form-urlencoded (RFC 6749 section 2.3.1)
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (client_id, secret) = decoded.split_once(':')?;
    Some((form_decode(client_id), form_decode(secret)))
}

/// Decode one form-urlencoded credential. `=` and `&` are data here, not separators.
fn form_decode(value: &str) -> String {
    let field = format!("v={}", value.replace('&', "%26"));
    form_urlencoded::parse(field.as_bytes())
        .map(|(_, value)| value.into_owned())
        .next()
        .unwrap_or_default()
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn hidden_field(name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) if !value.is_empty() => format!(
            r#"<input type="hidden" name="{}" value="{}">"#,
            name,
            escape_html(value)
        ),
        _ => String::new(),
    }
}

fn login_page(
    request: &AuthorizeRequest,
    validated: &ValidatedAuthorize,
    error: Option<&str>,
) -> Response {
    let client_name = if validated.client.client_name.is_empty() {
        &validated.client.client_id
    } else {
        &validated.client.client_name
    };
    let scopes: String = validated
        .scopes
        .iter()
        .map(|scope| format!("<li>{}</li>", escape_html(scope)))
        .collect();
    let error = error
        .map(|message| format!(r#"<p class="error">{}</p>"#, escape_html(message)))
        .unwrap_or_default();
    let hidden: String = [
        hidden_field("client_id", Some(&request.client_id)),
        hidden_field("redirect_uri", Some(&request.redirect_uri)),
        hidden_field("response_type", Some(&request.response_type)),
        hidden_field("scope", request.scope.as_deref()),
        hidden_field("state", request.state.as_deref()),
        hidden_field("nonce", request.nonce.as_deref()),
        hidden_field("code_challenge", request.code_challenge.as_deref()),
        hidden_field(
            "code_challenge_method",
            request.code_challenge_method.as_deref(),
        ),
    ]
    .concat();

    let page = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Sign in</title></head>
<body>
<h1>Sign in to {client}</h1>
{error}
<p>{client} is requesting access to:</p>
<ul>{scopes}</ul>
<form method="post" action="{action}">
{hidden}
<label>Username <input type="text" name="username" autofocus></label>
<label>Password <input type="password" name="password"></label>
<button type="submit" name="action" value="login">Sign in</button>
<button type="submit" name="action" value="deny">Cancel</button>
</form>
</body>
</html>"#,
        client = escape_html(client_name),
        error = error,
        scopes = scopes,
        action = LOGIN_PATH,
        hidden = hidden,
    );

    let mut response = Html(page).into_response();
    presets::no_store().apply(&mut response);
    response
}
