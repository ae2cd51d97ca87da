//! Authorize endpoint flows: implicit and authorization code issuance

use super::{generate_handle, parse_scopes, pkce, IssuanceError, TokenEngine, TOKEN_TYPE_BEARER};
use crate::grants::{Grant, GrantKind, GrantStoreBackend};
use crate::registry::{Client, GrantType, ResolvedScopes, TestUser};
use chrono::Utc;
use log::info;
use url::form_urlencoded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Code,
    Token,
    IdToken,
    IdTokenToken,
}

impl ResponseType {
    /// Parse a space separated `response_type`; the order of the values does not matter
    pub fn parse(value: &str) -> Result<Self, IssuanceError> {
        let mut parts: Vec<&str> = value.split_whitespace().collect();
        parts.sort_unstable();
        parts.dedup();
        match parts.as_slice() {
            ["code"] => Ok(Self::Code),
            ["token"] => Ok(Self::Token),
            ["id_token"] => Ok(Self::IdToken),
            ["id_token", "token"] => Ok(Self::IdTokenToken),
            [] => Err(IssuanceError::InvalidRequest(
                "Missing response_type".to_string(),
            )),
            _ => Err(IssuanceError::UnsupportedResponseType(format!(
                "Response type '{}' is not supported",
                value
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
            Self::IdToken => "id_token",
            Self::IdTokenToken => "id_token token",
        }
    }

    pub fn grant_type(&self) -> GrantType {
        match self {
            Self::Code => GrantType::AuthorizationCode,
            _ => GrantType::Implicit,
        }
    }

    pub fn issues_access_token(&self) -> bool {
        matches!(self, Self::Token | Self::IdTokenToken)
    }

    pub fn issues_identity_token(&self) -> bool {
        matches!(self, Self::IdToken | Self::IdTokenToken)
    }

    /// Implicit responses travel in the fragment, codes in the query
    pub fn uses_fragment(&self) -> bool {
        !matches!(self, Self::Code)
    }
}

/// Parameters of an authorization request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// `Origin` header of the request, if any
    pub origin: Option<String>,
}

/// An authorization request that passed every check and waits for the user
#[derive(Debug, Clone)]
pub struct ValidatedAuthorize {
    pub client: Client,
    pub redirect_uri: String,
    pub response_type: ResponseType,
    pub scopes: Vec<String>,
    pub resolved: ResolvedScopes,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn redirect_location(redirect_uri: &str, params: &[(&str, String)], fragment: bool) -> String {
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let separator = if fragment {
        '#'
    } else if redirect_uri.contains('?') {
        '&'
    } else {
        '?'
    };
    format!("{}{}{}", redirect_uri, separator, encoded)
}

/// Location that reports `error` back to the client through its redirect URI
pub fn error_redirect(
    redirect_uri: &str,
    response_type: Option<ResponseType>,
    error: &IssuanceError,
    state: Option<&str>,
) -> String {
    let mut params = vec![
        ("error", error.error_code().to_string()),
        ("error_description", error.description()),
    ];
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        params.push(("state", state.to_string()));
    }
    let fragment = response_type.is_some_and(|rt| rt.uses_fragment());
    redirect_location(redirect_uri, &params, fragment)
}

impl TokenEngine {
    /// Client and redirect URI checks. A failure here must be shown to the
    /// user and never redirected.
    pub fn check_redirect(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<Client, IssuanceError> {
        if client_id.is_empty() {
            return Err(IssuanceError::InvalidClient("Missing client_id".to_string()));
        }
        let client = self
            .registry
            .lookup_client(client_id)
            .map_err(|_| IssuanceError::InvalidClient(format!("Unknown client '{}'", client_id)))?;
        if !client.has_redirect_uri(redirect_uri) {
            return Err(IssuanceError::InvalidRedirectUri(
                "Invalid redirect_uri".to_string(),
            ));
        }
        Ok(client)
    }

    pub fn validate_authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<ValidatedAuthorize, IssuanceError> {
        let client = self.check_redirect(&request.client_id, &request.redirect_uri)?;
        let response_type = ResponseType::parse(&request.response_type)?;
        Self::require_grant(&client, response_type.grant_type())?;
        if response_type.issues_access_token() && !client.allow_access_tokens_via_browser {
            return Err(IssuanceError::UnauthorizedClient(format!(
                "Client '{}' may not receive access tokens via the browser",
                client.client_id
            )));
        }

        if let Some(origin) = non_empty(&request.origin).filter(|o| *o != "null") {
            if !client.allows_origin(origin) {
                return Err(IssuanceError::OriginNotAllowed(format!(
                    "Origin '{}' is not allowed for client '{}'",
                    origin, client.client_id
                )));
            }
        }

        let scopes = parse_scopes(request.scope.as_deref());
        if scopes.is_empty() {
            return Err(IssuanceError::InvalidRequest("Missing scope".to_string()));
        }
        let resolved = self.resolve_allowed(&client, &scopes)?;
        if resolved.offline_access
            && (response_type != ResponseType::Code || !client.allows_grant(GrantType::RefreshToken))
        {
            return Err(IssuanceError::InvalidScope(
                "offline_access requires the authorization code flow with refresh tokens"
                    .to_string(),
            ));
        }

        let nonce = non_empty(&request.nonce).map(str::to_string);
        if response_type.issues_identity_token() {
            if !resolved.has_openid() {
                return Err(IssuanceError::InvalidScope(
                    "The openid scope is required for id_token responses".to_string(),
                ));
            }
            if nonce.is_none() {
                return Err(IssuanceError::InvalidRequest("Missing nonce".to_string()));
            }
            if response_type == ResponseType::IdToken && !resolved.api_scopes.is_empty() {
                return Err(IssuanceError::InvalidScope(
                    "API scopes require an access token response type".to_string(),
                ));
            }
        }

        let (code_challenge, code_challenge_method) = match response_type {
            ResponseType::Code => match non_empty(&request.code_challenge) {
                Some(challenge) => {
                    let method = pkce::normalize_method(non_empty(&request.code_challenge_method))
                        .ok_or_else(|| {
                            IssuanceError::InvalidRequest(
                                "Unsupported code_challenge_method".to_string(),
                            )
                        })?;
                    (Some(challenge.to_string()), Some(method.to_string()))
                }
                None if client.require_pkce => {
                    return Err(IssuanceError::InvalidRequest(
                        "Missing code_challenge".to_string(),
                    ));
                }
                None => (None, None),
            },
            _ => (None, None),
        };

        Ok(ValidatedAuthorize {
            client,
            redirect_uri: request.redirect_uri.clone(),
            response_type,
            scopes,
            resolved,
            state: non_empty(&request.state).map(str::to_string),
            nonce,
            code_challenge,
            code_challenge_method,
        })
    }

    /// Complete an authorization for an authenticated user and return the
    /// location the browser is sent back to
    pub async fn authorize(
        &self,
        request: &ValidatedAuthorize,
        user: &TestUser,
    ) -> Result<String, IssuanceError> {
        let client = &request.client;
        self.record_consent(client, &user.subject_id, &request.scopes)
            .await?;

        let mut params: Vec<(&str, String)> = Vec::new();
        if request.response_type == ResponseType::Code {
            let handle = generate_handle();
            let mut grant = Grant::new(
                &handle,
                GrantKind::AuthorizationCode,
                &client.client_id,
                request.scopes.clone(),
                self.settings.code_lifetime,
            )
            .with_subject(&user.subject_id);
            grant.redirect_uri = Some(request.redirect_uri.clone());
            grant.code_challenge = request.code_challenge.clone();
            grant.code_challenge_method = request.code_challenge_method.clone();
            grant.nonce = request.nonce.clone();
            self.grants.put(&grant).await?;
            params.push(("code", handle));
        } else {
            if request.response_type.issues_access_token() {
                let (token, expires_in) = self.mint_access_token(
                    client,
                    &user.subject_id,
                    &request.scopes,
                    &request.resolved.audiences,
                )?;
                params.push(("access_token", token));
                params.push(("token_type", TOKEN_TYPE_BEARER.to_string()));
                params.push(("expires_in", expires_in.to_string()));
                params.push(("scope", request.scopes.join(" ")));
            }
            if request.response_type.issues_identity_token() {
                let id_token = self.mint_identity_token(
                    &client.client_id,
                    &user.subject_id,
                    request.nonce.as_deref(),
                    Utc::now().timestamp(),
                    &request.resolved,
                )?;
                params.push(("id_token", id_token));
            }
        }
        if let Some(state) = &request.state {
            params.push(("state", state.clone()));
        }

        info!(
            "Authorized '{}' for client '{}' with response type '{}'",
            user.subject_id,
            client.client_id,
            request.response_type.as_str()
        );
        Ok(redirect_location(
            &request.redirect_uri,
            &params,
            request.response_type.uses_fragment(),
        ))
    }
}
