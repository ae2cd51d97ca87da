use crate::error::VerifyError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An Ed25519 public key in JWK form (RFC 8037)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub kid: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Base64url encoded public key
    pub x: String,
}

impl Jwk {
    /// Build a signing JWK from a raw 32 byte Ed25519 public key.
    /// The key id is the RFC 7638 thumbprint of the key.
    pub fn ed25519(public_key: &[u8]) -> Self {
        let x = URL_SAFE_NO_PAD.encode(public_key);
        let kid = thumbprint("OKP", "Ed25519", &x);
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            kid,
            use_: Some("sig".to_string()),
            alg: Some("EdDSA".to_string()),
            x,
        }
    }

    /// RFC 7638 thumbprint computed from the required members
    pub fn thumbprint(&self) -> String {
        thumbprint(&self.kty, &self.crv, &self.x)
    }

    /// Convert to a key usable for signature verification
    pub fn decoding_key(&self) -> Result<DecodingKey, VerifyError> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return Err(VerifyError::InvalidKey(format!(
                "unsupported key type {}/{}",
                self.kty, self.crv
            )));
        }
        DecodingKey::from_ed_components(&self.x).map_err(VerifyError::from)
    }
}

fn thumbprint(kty: &str, crv: &str, x: &str) -> String {
    // members in lexicographic order, no whitespace
    let canonical = format!(r#"{{"crv":"{crv}","kty":"{kty}","x":"{x}"}}"#);
    let digest = Sha256::digest(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// JWKS document as served by `/.well-known/openid-configuration/jwks`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    /// Find a key by its id
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
