//! Request signing and authentication-token caching.
//!
//! Every authenticated request carries an HMAC-SHA256 signature over a
//! canonical message of timestamp, nonce, method, path and body. Nonces are
//! strictly increasing even when the wall clock stalls or steps backward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Mutex;
use verity_broker::{VenueError, VenueResult};

type HmacSha256 = Hmac<Sha256>;

/// Seconds an issued token remains valid at the venue.
pub(crate) const TOKEN_LIFETIME_SECS: u64 = 300;
/// Tokens are refreshed this long before expiry so an in-flight request
/// never straddles the boundary.
pub(crate) const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

/// Account credentials for private endpoints.
#[derive(Clone)]
pub struct Credentials {
    pub address: String,
    pub private_key: String,
}

/// A signed set of authentication headers for one request.
pub struct SignedHeaders {
    pub account: String,
    pub timestamp: i64,
    pub nonce: u64,
    pub signature: String,
}

/// Signs canonical request payloads for the venue.
pub struct Signer {
    credentials: Credentials,
    chain_id: String,
    last_nonce: AtomicU64,
}

impl Signer {
    pub fn new(credentials: Credentials, chain_id: impl Into<String>) -> Self {
        Self {
            credentials,
            chain_id: chain_id.into(),
            last_nonce: AtomicU64::new(0),
        }
    }

    /// Next nonce: current epoch millis, bumped past the previous nonce when
    /// the clock has not advanced. Strictly increasing per signer.
    pub fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .map(|prev| now.max(prev + 1))
            .unwrap_or(now)
    }

    /// Sign one request, producing the headers the venue expects.
    pub fn sign(&self, method: &str, path: &str, body: &str) -> VenueResult<SignedHeaders> {
        let timestamp = Utc::now().timestamp_millis();
        let nonce = self.next_nonce();
        let message = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}",
            self.chain_id, self.credentials.address, timestamp, nonce, method, path, body
        );
        let mut mac = HmacSha256::new_from_slice(self.credentials.private_key.as_bytes())
            .map_err(|err| VenueError::Auth(format!("failed to create signing key: {err}")))?;
        mac.update(message.as_bytes());
        Ok(SignedHeaders {
            account: self.credentials.address.clone(),
            timestamp,
            nonce,
            signature: hex::encode(mac.finalize().into_bytes()),
        })
    }
}

struct CachedToken {
    token: String,
    issued_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        let usable = TOKEN_LIFETIME_SECS.saturating_sub(TOKEN_REFRESH_MARGIN_SECS);
        self.issued_at.elapsed().as_secs() < usable
    }
}

/// Caches the venue-issued bearer token until shortly before expiry.
///
/// Concurrent callers racing on a stale token may each fetch a fresh one;
/// the venue tolerates this, so the cache favors simplicity over
/// single-flight coordination.
#[derive(Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// Return the cached token, or fetch a new one via `fetch` when the
    /// cached one is missing or near expiry.
    pub async fn token<F, Fut>(&self, fetch: F) -> VenueResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = VenueResult<String>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.token.clone());
            }
        }
        let token = fetch().await?;
        *slot = Some(CachedToken {
            token: token.clone(),
            issued_at: Instant::now(),
        });
        Ok(token)
    }

    /// Drop the cached token, forcing a refresh on next use. Called when the
    /// venue answers 401 despite a token we thought was fresh.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new(
            Credentials {
                address: "0xabc".into(),
                private_key: "test-key".into(),
            },
            "PRIVATE_SN_POTC_SEPOLIA",
        )
    }

    #[test]
    fn nonces_strictly_increase() {
        let signer = signer();
        let mut previous = 0;
        for _ in 0..1_000 {
            let nonce = signer.next_nonce();
            assert!(nonce > previous, "nonce {nonce} not above {previous}");
            previous = nonce;
        }
    }

    #[test]
    fn signature_is_hex_encoded_sha256() {
        let headers = signer().sign("POST", "/v1/orders", "{}").unwrap();
        assert_eq!(headers.signature.len(), 64);
        assert!(headers.nonce > 0);
    }

    #[test]
    fn same_body_signs_identically_apart_from_nonce() {
        let signer = signer();
        let first = signer.sign("GET", "/v1/orders", "").unwrap();
        let second = signer.sign("GET", "/v1/orders", "").unwrap();
        assert!(second.nonce > first.nonce);
    }

    #[tokio::test]
    async fn token_cache_fetches_once_while_fresh() {
        let cache = TokenCache::default();
        let first = cache.token(|| async { Ok("tok-1".to_string()) }).await;
        assert_eq!(first.unwrap(), "tok-1");
        let second = cache
            .token(|| async { panic!("must not refetch a fresh token") })
            .await;
        assert_eq!(second.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn invalidated_token_is_refetched() {
        let cache = TokenCache::default();
        cache
            .token(|| async { Ok("tok-1".to_string()) })
            .await
            .unwrap();
        cache.invalidate().await;
        let token = cache.token(|| async { Ok("tok-2".to_string()) }).await;
        assert_eq!(token.unwrap(), "tok-2");
    }
}
