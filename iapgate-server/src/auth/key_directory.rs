use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::RwLock;

use crate::auth::AuthError;

/// Minimum age of the cached JWK set before an unknown `kid` triggers a refresh.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for a single JWK set request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

fn read_key_from_file(filename: &Path) -> anyhow::Result<DecodingKey> {
    let key_content = std::fs::read(filename).context("reading key")?;

    DecodingKey::from_ec_pem(&key_content)
        .or_else(|_| DecodingKey::from_rsa_pem(&key_content))
        .or_else(|_| DecodingKey::from_ed_pem(&key_content))
        .context("parsing key")
}

/// Directory of locally configured keys, keyed on the key ID.
#[derive(Default)]
pub struct PublicKeyDirectory {
    /// Mapping from key ID to key.
    pub keys: BTreeMap<String, DecodingKey>,
}

impl fmt::Debug for PublicKeyDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyDirectory")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TryFrom<&BTreeMap<String, PathBuf>> for PublicKeyDirectory {
    type Error = anyhow::Error;

    fn try_from(key_files: &BTreeMap<String, PathBuf>) -> Result<Self, Self::Error> {
        Ok(Self {
            keys: key_files
                .iter()
                .map(|(kid, path)| {
                    let key = read_key_from_file(path)
                        .with_context(|| format!("loading key `{kid}` from {}", path.display()))?;
                    Ok((kid.clone(), key))
                })
                .collect::<anyhow::Result<_>>()?,
        })
    }
}

#[derive(Default)]
struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
}

impl CachedKeys {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }

    fn recently_attempted(&self) -> bool {
        self.attempted_at
            .is_some_and(|at| at.elapsed() < MIN_REFRESH_INTERVAL)
    }
}

/// A remote JWK set, fetched lazily and cached for a configurable time.
///
/// When a token names a key that is not in the cache, the set is refreshed early. Refreshes are
/// attempted at most once per [`MIN_REFRESH_INTERVAL`], whether they succeed or not. If a refresh
/// fails, previously fetched keys stay usable.
pub struct JwksCache {
    client: reqwest::Client,
    url: String,
    ttl: Duration,
    cached: RwLock<CachedKeys>,
}

impl JwksCache {
    /// Creates an empty cache for the JWK set at `url`.
    pub fn new(client: reqwest::Client, url: &str, ttl: Duration) -> Self {
        Self {
            client,
            url: url.to_owned(),
            ttl,
            cached: RwLock::default(),
        }
    }

    async fn key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cached = self.cached.read().await;
            match cached.keys.get(kid) {
                Some(key) if cached.is_fresh(self.ttl) || cached.recently_attempted() => {
                    return Ok(key.clone());
                }
                None if cached.recently_attempted() => {
                    return Err(AuthError::UnknownKey(kid.to_owned()));
                }
                _ => {}
            }
        }

        let mut cached = self.cached.write().await;

        // Another request may have refreshed the keys while we were waiting for the lock.
        if !cached.recently_attempted() {
            cached.attempted_at = Some(Instant::now());
            match self.fetch().await {
                Ok(keys) => {
                    cached.keys = keys;
                    cached.fetched_at = Some(Instant::now());
                }
                Err(err) if cached.keys.contains_key(kid) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "failed to refresh JWK set, using stale keys"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        cached
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::UnknownKey(kid.to_owned()))
    }

    async fn fetch(&self) -> Result<HashMap<String, DecodingKey>, AuthError> {
        tracing::debug!(url = %self.url, "fetching JWK set");

        let fetch_error = |err: reqwest::Error| AuthError::KeyFetch(err.to_string());
        let jwks: JwkSet = self
            .client
            .get(&self.url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?
            .json()
            .await
            .map_err(fetch_error)?;

        let keys = jwks
            .keys
            .iter()
            .filter_map(|jwk| {
                let kid = jwk.common.key_id.clone()?;
                match DecodingKey::from_jwk(jwk) {
                    Ok(key) => Some((kid, key)),
                    Err(err) => {
                        tracing::warn!(kid, error = &err as &dyn std::error::Error, "skipping JWK");
                        None
                    }
                }
            })
            .collect::<HashMap<_, _>>();

        tracing::debug!(keys = keys.len(), "fetched JWK set");
        Ok(keys)
    }
}

impl fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksCache")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Where verification keys come from.
#[derive(Debug)]
pub enum KeySource {
    /// Keys loaded once at startup.
    Static(PublicKeyDirectory),
    /// Keys published as a JWK set, such as IAP's public keys.
    Remote(JwksCache),
}

impl KeySource {
    /// Returns the key for the given key ID.
    pub async fn key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        match self {
            KeySource::Static(directory) => directory
                .keys
                .get(kid)
                .cloned()
                .ok_or_else(|| AuthError::UnknownKey(kid.to_owned())),
            KeySource::Remote(cache) => cache.key(kid).await,
        }
    }
}
