//! Proof Key for Code Exchange (RFC 7636)

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const S256: &str = "S256";
pub const PLAIN: &str = "plain";

/// The method a challenge was created with; `plain` when none was given
pub fn normalize_method(method: Option<&str>) -> Option<&'static str> {
    match method.unwrap_or(PLAIN) {
        S256 => Some(S256),
        PLAIN => Some(PLAIN),
        _ => None,
    }
}

pub fn challenge_for(verifier: &str, method: &str) -> String {
    if method == S256 {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    } else {
        verifier.to_string()
    }
}

/// Verifier length and alphabet as RFC 7636 section 4.1 requires
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

pub fn verify(challenge: &str, method: Option<&str>, verifier: &str) -> bool {
    let Some(method) = normalize_method(method) else {
        return false;
    };
    if !is_valid_verifier(verifier) {
        return false;
    }
    let expected = challenge_for(verifier, method);
    expected.as_bytes().ct_eq(challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256() {
        assert_eq!(challenge_for(VERIFIER, S256), CHALLENGE);
        assert!(verify(CHALLENGE, Some("S256"), VERIFIER));
        assert!(!verify(CHALLENGE, Some("S256"), &VERIFIER.replace('d', "e")));
    }

    #[test]
    fn test_plain_is_default() {
        assert!(verify(VERIFIER, None, VERIFIER));
        assert!(!verify(CHALLENGE, None, VERIFIER));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(!verify(CHALLENGE, Some("S512"), VERIFIER));
        assert!(!verify("short", Some("plain"), "short"));
        assert!(normalize_method(Some("s256")).is_none());
    }
}
