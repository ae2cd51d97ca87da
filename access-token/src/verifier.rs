use crate::claims::AccessTokenClaims;
use crate::error::VerifyError;
use crate::jwk::JwkSet;
use crate::SIGNING_ALGORITHM;
use jsonwebtoken::{decode, decode_header, Validation};
use log::debug;

/// Verifies bearer tokens against a published key set
#[derive(Debug, Clone, Default)]
pub struct TokenVerifier {
    issuer: Option<String>,
    audience: Option<String>,
    leeway: u64,
}

impl TokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept tokens issued by `issuer`
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Only accept tokens whose audience contains `audience`
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Clock skew tolerated on `exp` / `nbf`, in seconds
    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    /// Read the key id from the token header without verifying anything
    pub fn key_id(token: &str) -> Result<String, VerifyError> {
        decode_header(token)?.kid.ok_or(VerifyError::MissingKeyId)
    }

    /// Verify signature, expiry, issuer and audience, returning the claims
    pub fn verify(&self, token: &str, keys: &JwkSet) -> Result<AccessTokenClaims, VerifyError> {
        let kid = Self::key_id(token)?;
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| VerifyError::UnknownKey(kid.clone()))?;
        let key = jwk.decoding_key()?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = self.leeway;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<AccessTokenClaims>(token, &key, &validation)?;
        debug!(
            "Verified token '{}' for subject '{}' signed with key '{}'",
            data.claims.jti, data.claims.sub, kid
        );
        Ok(data.claims)
    }
}
