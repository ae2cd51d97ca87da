use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token header has no key id")]
    MissingKeyId,

    #[error("No published key with id '{0}'")]
    UnknownKey(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Token issuer is not accepted")]
    InvalidIssuer,

    #[error("Token audience is not accepted")]
    InvalidAudience,
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::ImmatureSignature => VerifyError::NotYetValid,
            ErrorKind::InvalidSignature => VerifyError::InvalidSignature,
            ErrorKind::InvalidIssuer => VerifyError::InvalidIssuer,
            ErrorKind::InvalidAudience => VerifyError::InvalidAudience,
            ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                VerifyError::InvalidKey(err.to_string())
            }
            _ => VerifyError::Malformed(err.to_string()),
        }
    }
}
