//! Bearer token verification.

use async_trait::async_trait;
use jsonwebtoken::{
    decode, decode_header, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::access::OrgRole;

/// Lifetime stamped on tokens minted by [`Hs256Verifier::sign`] without one.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Minimum gap between two key set fetches triggered by unknown `kid`s.
pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// `admin` / `member`, optionally `org:` prefixed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_role: Option<String>,
    /// Expiry as seconds since the epoch. Verification requires it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl Claims {
    /// Unknown role strings are ignored rather than rejected.
    pub fn org_role(&self) -> Option<OrgRole> {
        self.org_role.as_deref().and_then(|r| r.parse().ok())
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Claims>;
}

/// `exp` is required and checked for both token kinds.
fn validation(alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.set_required_spec_claims(&["exp"]);
    validation.validate_exp = true;
    validation
}

pub struct Hs256Verifier {
    key: DecodingKey,
    signing: EncodingKey,
}

impl Hs256Verifier {
    pub fn new(secret: String) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            signing: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token with the same secret, for local tooling and tests.
    pub fn sign(&self, claims: &Claims) -> jsonwebtoken::errors::Result<String> {
        let mut claims = claims.clone();
        if claims.exp.is_none() {
            claims.exp = Some(get_current_timestamp() + DEFAULT_TOKEN_TTL_SECS);
        }
        encode(&Header::new(Algorithm::HS256), &claims, &self.signing)
    }
}

#[async_trait]
impl TokenVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.key, &validation(Algorithm::HS256))
            .map_err(|e| tracing::debug!(error = %e, "rejected bearer token"))
            .ok()
            .map(|d| d.claims)
    }
}

/// RS256 tokens from a hosted auth provider, checked against its JWKS.
pub struct JwksVerifier {
    jwks_url: String,
    client: reqwest::Client,
    refetch_interval: Duration,
    cache: RwLock<KeyCache>,
}

#[derive(Default)]
struct KeyCache {
    keys: Vec<Jwk>,
    fetched_at: Option<Instant>,
}

#[derive(Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

impl KeyCache {
    fn key(&self, kid: &str) -> Option<DecodingKey> {
        let jwk = self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))?;
        DecodingKey::from_rsa_components(jwk.n.as_deref()?, jwk.e.as_deref()?).ok()
    }
}

impl JwksVerifier {
    pub fn new(jwks_url: String) -> Self {
        Self {
            jwks_url,
            client: reqwest::Client::new(),
            refetch_interval: DEFAULT_REFETCH_INTERVAL,
            cache: RwLock::new(KeyCache::default()),
        }
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = interval;
        self
    }

    async fn fetch_keys(&self) -> reqwest::Result<Jwks> {
        self.client
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Claim the next fetch slot. Only one caller per interval gets it, so a
    /// stream of unknown `kid`s cannot turn every request into a fetch.
    async fn claim_refetch(&self) -> bool {
        let mut cache = self.cache.write().await;
        let due = cache
            .fetched_at
            .map_or(true, |at| at.elapsed() >= self.refetch_interval);
        if due {
            cache.fetched_at = Some(Instant::now());
        }
        due
    }

    async fn key_for(&self, kid: &str) -> Option<DecodingKey> {
        if let Some(key) = self.cache.read().await.key(kid) {
            return Some(key);
        }
        if !self.claim_refetch().await {
            tracing::debug!(kid, "unknown signing key, refetch not due yet");
            return None;
        }
        // fetched without holding the cache lock
        match self.fetch_keys().await {
            Ok(jwks) => {
                tracing::info!(url = %self.jwks_url, keys = jwks.keys.len(), "signing keys refreshed");
                let mut cache = self.cache.write().await;
                cache.keys = jwks.keys;
                cache.key(kid)
            }
            Err(e) => {
                tracing::warn!(url = %self.jwks_url, error = %e, "failed to fetch signing keys");
                None
            }
        }
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Option<Claims> {
        let header = decode_header(token).ok()?;
        let kid = header.kid?;
        let key = self.key_for(&kid).await?;
        decode::<Claims>(token, &key, &validation(Algorithm::RS256))
            .map_err(|e| tracing::debug!(error = %e, "rejected bearer token"))
            .ok()
            .map(|d| d.claims)
    }
}
