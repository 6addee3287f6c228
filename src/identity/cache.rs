//! Device verification-key cache.
//!
//! Keys are fetched from the external key authority on first use and kept
//! in a bounded LRU. Concurrent first-time lookups for the same device id
//! coalesce into a single outstanding fetch; a verification failure caused
//! by a stale key invalidates the entry so the next attempt re-fetches.

use crate::error::{GatewayError, Result};

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::DecodingKey;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::OnceCell;

/// Source of device verification keys. Only retrieval is consumed here;
/// provisioning lives behind the hub's HTTP surface.
#[async_trait]
pub trait KeyAuthority: Send + Sync {
    /// Fetch the PEM-encoded public key for a device.
    async fn fetch_key(&self, device_id: &str) -> Result<String>;
}

/// Cached verification key for one device.
pub struct DeviceIdentity {
    pub device_id: Arc<str>,
    pub key: DecodingKey,
    pub fetched_at: Instant,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

type KeySlot = Arc<OnceCell<Arc<DeviceIdentity>>>;

/// Bounded key cache with single-flight miss coalescing.
pub struct KeyCache {
    authority: Arc<dyn KeyAuthority>,
    keys: Mutex<LruCache<Arc<str>, Arc<DeviceIdentity>>>,
    inflight: DashMap<Arc<str>, KeySlot>,
}

impl KeyCache {
    pub fn new(authority: Arc<dyn KeyAuthority>, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| GatewayError::Config("key cache capacity must be > 0".to_string()))?;
        Ok(Self {
            authority,
            keys: Mutex::new(LruCache::new(capacity)),
            inflight: DashMap::new(),
        })
    }

    /// Return the cached key for `device_id`, fetching it once on a miss.
    pub async fn get(&self, device_id: &str) -> Result<Arc<DeviceIdentity>> {
        if let Some(identity) = self.keys.lock().get(device_id).cloned() {
            return Ok(identity);
        }

        let id: Arc<str> = Arc::from(device_id);
        let slot = self
            .inflight
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let fetch = slot
            .get_or_try_init(|| self.fetch_and_cache(id.clone()))
            .await
            .cloned();

        // The slot only existed to dedupe the fetch; the LRU is the cache.
        self.inflight.remove(&id);
        fetch
    }

    /// Drop the cached key so the next lookup re-fetches.
    pub fn invalidate(&self, device_id: &str) {
        self.keys.lock().pop(device_id);
        self.inflight.remove(device_id);
        tracing::debug!(device_id, "invalidated cached verification key");
    }

    async fn fetch_and_cache(&self, device_id: Arc<str>) -> Result<Arc<DeviceIdentity>> {
        let pem = self.authority.fetch_key(&device_id).await?;
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| GatewayError::KeyAuthority(format!("malformed key PEM: {e}")))?;

        let identity = Arc::new(DeviceIdentity {
            device_id: device_id.clone(),
            key,
            fetched_at: Instant::now(),
        });
        self.keys.lock().put(device_id, identity.clone());
        Ok(identity)
    }

    #[cfg(test)]
    pub fn cached_key_count(&self) -> usize {
        self.keys.lock().len()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyResponse {
    public_key: String,
}

/// Key authority backed by the hub HTTP API.
pub struct HttpKeyAuthority {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKeyAuthority {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::KeyAuthority(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl KeyAuthority for HttpKeyAuthority {
    async fn fetch_key(&self, device_id: &str) -> Result<String> {
        let url = format!("{}/things/{}/key", self.base_url, device_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::KeyAuthority(format!("key fetch failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::UnknownIdentity(device_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(GatewayError::KeyAuthority(format!(
                "key fetch for {} returned status {}",
                device_id,
                response.status()
            )));
        }

        let body: KeyResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::KeyAuthority(format!("malformed key response: {e}")))?;
        Ok(body.public_key)
    }
}
