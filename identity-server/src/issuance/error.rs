use crate::grants::GrantStoreError;
use crate::signing::SigningError;
use http::StatusCode;
use thiserror::Error;

/// Failures of the grant-type flows, each carrying a human readable description
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IssuanceError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    InvalidClient(String),
    #[error("{0}")]
    UnauthorizedClient(String),
    #[error("{0}")]
    UnsupportedGrantType(String),
    #[error("{0}")]
    UnsupportedResponseType(String),
    #[error("{0}")]
    InvalidScope(String),
    #[error("{0}")]
    InvalidRedirectUri(String),
    #[error("{0}")]
    OriginNotAllowed(String),
    #[error("{0}")]
    InvalidGrant(String),
    #[error("{0}")]
    GrantAlreadyUsed(String),
    #[error("{0}")]
    GrantExpired(String),
    #[error("{0}")]
    AccessDenied(String),
    #[error("{0}")]
    StorageUnavailable(String),
    #[error("{0}")]
    Signing(String),
}

impl IssuanceError {
    /// OAuth 2.0 `error` code sent on the wire
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidRedirectUri(_) | Self::OriginNotAllowed(_) => {
                "invalid_request"
            }
            Self::InvalidClient(_) => "invalid_client",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InvalidGrant(_) | Self::GrantAlreadyUsed(_) | Self::GrantExpired(_) => {
                "invalid_grant"
            }
            Self::AccessDenied(_) => "access_denied",
            Self::StorageUnavailable(_) => "temporarily_unavailable",
            Self::Signing(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Whether the client and redirect URI could not be trusted, so the
    /// error must not be sent back through the redirect URI
    pub fn is_untrusted_redirect(&self) -> bool {
        matches!(self, Self::InvalidClient(_) | Self::InvalidRedirectUri(_))
    }

    pub(crate) fn from_grant_error(err: GrantStoreError, what: &str) -> Self {
        match err {
            GrantStoreError::NotFound => Self::InvalidGrant(format!("Invalid {}", what)),
            GrantStoreError::AlreadyConsumed => {
                Self::GrantAlreadyUsed(format!("The {} has already been used", what))
            }
            GrantStoreError::Expired => Self::GrantExpired(format!("The {} has expired", what)),
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<GrantStoreError> for IssuanceError {
    fn from(err: GrantStoreError) -> Self {
        Self::from_grant_error(err, "grant")
    }
}

impl From<SigningError> for IssuanceError {
    fn from(err: SigningError) -> Self {
        Self::Signing(err.to_string())
    }
}
