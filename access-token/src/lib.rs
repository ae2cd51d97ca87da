//! # access-token
//!
//! Token model shared by the identity server and the API gateway.
//!
//! ## Components
//!
//! - **Claims:** the JWT access-token payload issued by the identity server.
//! - **JWK:** Ed25519 public keys as published on the JWKS endpoint.
//! - **Verifier:** signature, expiry, issuer and audience checks for bearer tokens.

pub mod claims;
pub mod error;
pub mod jwk;
pub mod verifier;

pub use claims::AccessTokenClaims;
pub use error::VerifyError;
pub use jwk::{Jwk, JwkSet};
pub use verifier::TokenVerifier;

/// JOSE algorithm used for every token signed by the identity server
pub const SIGNING_ALGORITHM: jsonwebtoken::Algorithm = jsonwebtoken::Algorithm::EdDSA;
