//! Signing key provider: the Ed25519 keys tokens are signed with.
//!
//! One key is current and signs new tokens. After [`SigningKeyProvider::rotate`]
//! the previous key keeps being published in the JWKS until its grace period
//! ends, so tokens it signed stay verifiable. The grace period never drops
//! below the longest access token lifetime the catalog hands out.
//!
//! With a key file the current key is written back on every rotation, so a
//! restart keeps signing with the latest key. Retired keys are held in memory
//! only; after a restart tokens signed by them no longer verify.

use access_token::{Jwk, JwkSet};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::EncodingKey;
use log::{info, warn};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Failed to generate signing key")]
    Generate,
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
    #[error("Failed to access key file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// The key new tokens are signed with
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub encoding_key: EncodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").field("kid", &self.kid).finish()
    }
}

struct KeyEntry {
    signing: SigningKey,
    jwk: Jwk,
    /// Set once the key is rotated out; the key is dropped after this instant
    retire_at: Option<DateTime<Utc>>,
}

impl KeyEntry {
    fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, SigningError> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let jwk = Jwk::ed25519(key_pair.public_key().as_ref());
        Ok(Self {
            signing: SigningKey {
                kid: jwk.kid.clone(),
                encoding_key: EncodingKey::from_ed_der(pkcs8),
            },
            jwk,
            retire_at: None,
        })
    }
}

struct KeyRing {
    current: KeyEntry,
    retired: Vec<KeyEntry>,
}

pub struct SigningKeyProvider {
    ring: RwLock<KeyRing>,
    grace_period_secs: AtomicU64,
    key_file: Option<PathBuf>,
}

fn generate_pkcs8() -> Result<Vec<u8>, SigningError> {
    let document =
        Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).map_err(|_| SigningError::Generate)?;
    Ok(document.as_ref().to_vec())
}

/// Write the key to a staging file and rename it over `path`
fn write_key_file(path: &Path, pkcs8: &[u8]) -> Result<(), SigningError> {
    let io_error = |source| SigningError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    std::fs::write(&staging, pkcs8).map_err(io_error)?;
    std::fs::rename(&staging, path).map_err(io_error)
}

impl SigningKeyProvider {
    /// Build a provider from a PKCS#8 (v2) encoded Ed25519 key
    pub fn from_pkcs8(pkcs8: &[u8], grace_period_secs: u64) -> Result<Self, SigningError> {
        Ok(Self {
            ring: RwLock::new(KeyRing {
                current: KeyEntry::from_pkcs8(pkcs8)?,
                retired: Vec::new(),
            }),
            grace_period_secs: AtomicU64::new(grace_period_secs),
            key_file: None,
        })
    }

    /// Build a provider with a freshly generated, ephemeral key
    pub fn generate(grace_period_secs: u64) -> Result<Self, SigningError> {
        Self::from_pkcs8(&generate_pkcs8()?, grace_period_secs)
    }

    /// Load the key stored at `key_file`, generating and persisting one when the
    /// file does not exist. Without a path the key lives only in memory.
    pub fn load_or_generate(
        key_file: Option<&str>,
        grace_period_secs: u64,
    ) -> Result<Self, SigningError> {
        let Some(path) = key_file else {
            warn!("No signing key file configured, using an ephemeral key");
            return Self::generate(grace_period_secs);
        };

        if Path::new(path).exists() {
            let pkcs8 = std::fs::read(path).map_err(|source| SigningError::Io {
                path: path.to_string(),
                source,
            })?;
            let mut provider = Self::from_pkcs8(&pkcs8, grace_period_secs)?;
            provider.key_file = Some(PathBuf::from(path));
            info!("Loaded signing key '{}' from {}", provider.current_signing_key().kid, path);
            return Ok(provider);
        }

        let pkcs8 = generate_pkcs8()?;
        write_key_file(Path::new(path), &pkcs8)?;
        let mut provider = Self::from_pkcs8(&pkcs8, grace_period_secs)?;
        provider.key_file = Some(PathBuf::from(path));
        info!("Generated signing key '{}' and stored it in {}", provider.current_signing_key().kid, path);
        Ok(provider)
    }

    pub fn grace_period_secs(&self) -> u64 {
        self.grace_period_secs.load(Ordering::Relaxed)
    }

    /// Raise the grace period to at least `min_secs`. Returns true when it was raised.
    pub fn ensure_grace_period(&self, min_secs: u64) -> bool {
        let previous = self.grace_period_secs.fetch_max(min_secs, Ordering::Relaxed);
        if previous < min_secs {
            warn!(
                "Signing key grace period raised from {}s to {}s to cover the longest access token lifetime",
                previous, min_secs
            );
            return true;
        }
        false
    }

    pub fn current_signing_key(&self) -> SigningKey {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .signing
            .clone()
    }

    /// Public keys of the current key and of retired keys still in their grace period
    pub fn public_key_set(&self) -> JwkSet {
        let now = Utc::now();
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys = vec![ring.current.jwk.clone()];
        keys.extend(
            ring.retired
                .iter()
                .filter(|entry| entry.retire_at.is_some_and(|at| at > now))
                .map(|entry| entry.jwk.clone()),
        );
        JwkSet::new(keys)
    }

    /// Replace the current key with a new one, returning the new key id.
    /// The old key stays published for the grace period.
    pub fn rotate(&self) -> Result<String, SigningError> {
        let pkcs8 = generate_pkcs8()?;
        let mut entry = KeyEntry::from_pkcs8(&pkcs8)?;
        let kid = entry.signing.kid.clone();
        if let Some(path) = &self.key_file {
            write_key_file(path, &pkcs8)?;
        }
        let now = Utc::now();
        let grace_period = Duration::seconds(self.grace_period_secs() as i64);

        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        ring.retired
            .retain(|entry| entry.retire_at.is_some_and(|at| at > now));
        std::mem::swap(&mut ring.current, &mut entry);
        entry.retire_at = Some(now + grace_period);
        info!("Rotated signing key '{}' -> '{}'", entry.signing.kid, kid);
        ring.retired.push(entry);
        Ok(kid)
    }
}

/// Rotate the signing key every `interval_secs` until `shutdown` is cancelled.
/// An interval of zero disables rotation.
pub async fn run_rotation(
    provider: std::sync::Arc<SigningKeyProvider>,
    interval_secs: u64,
    shutdown: tokio_util::sync::CancellationToken,
) {
    if interval_secs == 0 {
        shutdown.cancelled().await;
        return;
    }
    let period = std::time::Duration::from_secs(interval_secs);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = provider.rotate() {
                    warn!("Signing key rotation failed: {}", e);
                }
            }
        }
    }
}
