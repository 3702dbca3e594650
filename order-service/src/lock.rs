use async_trait::async_trait;
use shared::{AdmissionError, AdmissionStage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-variant mutual exclusion backed by an expiring key-value store.
///
/// `try_acquire` must be a single atomic conditional-set-with-expiry: one
/// round trip, never a check-then-set pair. `release` must only delete the
/// entry when the stored token matches the caller's, so a late release from
/// an expired holder cannot revoke a newer holder's lock.
///
/// `InMemoryLockStore` is the default backend; a multi-instance deployment
/// plugs a networked store (Redis `SET NX PX`, an etcd lease, ...) in
/// behind the same trait.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Returns whether an entry held by `token` was deleted.
    async fn release(&self, key: &str, token: &str) -> anyhow::Result<bool>;
}

struct LockEntry {
    token: String,
    expires_at: Instant,
}

/// Mutex-guarded map of `key -> (token, expiry)`. Expired entries count as
/// absent on acquire, which is what gives the TTL its fail-open semantics:
/// a crashed holder's entry simply stops mattering.
#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("lock store mutex poisoned"))?;
        let now = Instant::now();
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            LockEntry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> anyhow::Result<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("lock store mutex poisoned"))?;
        match entries.get(key) {
            Some(entry) if entry.token == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub key_prefix: String,
    pub ttl: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "order-lock:".to_string(),
            ttl: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
            max_attempts: 50,
        }
    }
}

/// Acquires and releases the per-variant admission lock with a bounded,
/// sleep-based retry. Each admission attempt owns its holder token for the
/// whole lock lifecycle; nothing about a lock lives outside the attempt
/// that acquired it.
pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    config: LockConfig,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    fn key(&self, variant_id: &str) -> String {
        format!("{}{}", self.config.key_prefix, variant_id)
    }

    /// Acquire the lock for `variant_id`, retrying up to the configured
    /// budget. Returns the holder token on success. The sleep between
    /// attempts is an await point, so dropping the future abandons the
    /// wait with nothing to clean up.
    pub async fn acquire(&self, variant_id: &str) -> Result<String, AdmissionError> {
        let key = self.key(variant_id);
        let token = Uuid::new_v4().to_string();

        for _ in 0..self.config.max_attempts {
            let acquired = self
                .store
                .try_acquire(&key, &token, self.config.ttl)
                .await
                .map_err(|e| AdmissionError::storage(AdmissionStage::AcquireLock, e))?;
            if acquired {
                debug!(variant_id, stage = %AdmissionStage::AcquireLock, "admission lock acquired");
                return Ok(token);
            }
            tokio::time::sleep(self.config.retry_interval).await;
        }

        Err(AdmissionError::LockTimeout {
            variant_id: variant_id.to_string(),
            waited: self.config.retry_interval * self.config.max_attempts,
        })
    }

    /// Release the lock held under `token`. Never fails the admission: a
    /// store error or a token mismatch (the TTL already expired and someone
    /// else holds the key) is logged and swallowed.
    pub async fn release(&self, variant_id: &str, token: &str) {
        let key = self.key(variant_id);
        match self.store.release(&key, token).await {
            Ok(true) => {
                debug!(variant_id, stage = %AdmissionStage::ReleaseLock, "admission lock released");
            }
            Ok(false) => {
                warn!(
                    variant_id,
                    "admission lock no longer held by this attempt; ttl likely expired"
                );
            }
            Err(err) => {
                warn!(variant_id, error = %err, "failed to release admission lock");
            }
        }
    }
}
