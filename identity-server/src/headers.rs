//! Caching headers for protocol responses.
//!
//! Token responses, authorize errors and the login page carry credentials or
//! single-use values and must never be stored (RFC 6749 section 5.1).
//! Discovery and JWKS documents are public and change rarely.

use axum::http::HeaderValue;
use axum::response::Response;
use chrono::{Duration, Utc};
use http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use log::warn;

/// How a response may be cached by clients and intermediaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caching {
    /// `Cache-Control: no-store` with the HTTP/1.0 `Pragma` fallback
    NoStore,
    /// Cacheable by anyone for `max_age` seconds
    Public { max_age: u32 },
}

impl Caching {
    fn cache_control(&self) -> HeaderValue {
        match self {
            Caching::NoStore => HeaderValue::from_static("no-store"),
            Caching::Public { max_age } => {
                HeaderValue::from_str(&format!("public, max-age={max_age}"))
                    .unwrap_or(HeaderValue::from_static("public"))
            }
        }
    }

    /// Set the caching headers on a response, replacing any present
    pub fn apply<B>(&self, response: &mut Response<B>) {
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, self.cache_control());

        match self {
            Caching::NoStore => {
                headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
                headers.insert(EXPIRES, HeaderValue::from_static("0"));
            }
            Caching::Public { max_age } => {
                let expires = Utc::now() + Duration::seconds(i64::from(*max_age));
                match HeaderValue::from_str(&expires.to_rfc2822()) {
                    Ok(value) => {
                        headers.insert(EXPIRES, value);
                    }
                    Err(e) => warn!("failed to set expires header: {e}"),
                }
            }
        }
    }
}

pub mod presets {
    use super::Caching;

    pub fn no_store() -> Caching {
        Caching::NoStore
    }

    pub fn public_cache(max_age: u32) -> Caching {
        Caching::Public { max_age }
    }
}
