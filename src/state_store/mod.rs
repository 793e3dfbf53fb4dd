//! Component K — Shared State Store Contract. A single in-process surface
//! other components use for ephemeral key/value state, distributed locks,
//! health-status caching, and pub/sub fan-out, so no component reaches for
//! its own ad-hoc cache.
//!
//! The original source implied a Redis-backed `redis_client` contract
//! (`utils/secrets.py::SecureSecretStore`, `workflows/core/scheduler.py`'s
//! job-state lookups). SPEC_FULL.md does not prescribe an external store, so
//! this is reimplemented over `moka::sync::Cache` (already in the teacher's
//! dependency stack) for TTL'd key/value state, plus `tokio::sync::
//! broadcast` for publish/subscribe.

use moka::notification::RemovalCause;
use moka::sync::Cache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[derive(Clone)]
struct Entry {
    bytes: Vec<u8>,
    ttl: Option<Duration>,
}

struct PerEntryExpiry;

impl Expiry<String, Entry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// The storage surface every component depends on through `Arc<dyn
/// StateStore>` rather than a concrete cache type, so tests can swap in a
/// bare in-memory instance without wiring real infrastructure.
pub trait StateStore: Send + Sync {
    fn set_bytes(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>);
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>>;
    fn delete(&self, key: &str);
    fn exists(&self, key: &str) -> bool {
        self.get_bytes(key).is_some()
    }

    /// Publishes `payload` on `channel`. Silently drops if nobody is
    /// subscribed (spec.md §4.K: "publish with no subscribers is a no-op,
    /// not an error").
    fn publish(&self, channel: &str, payload: Value);

    /// Subscribes to `channel`. Each subscriber gets its own receiver and
    /// misses nothing published after this call.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Value>;
}

pub trait StateStoreExt: StateStore {
    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: Option<u64>) -> anyhow::Result<()> {
        self.set_bytes(key, serde_json::to_vec(value)?, ttl_seconds);
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get_bytes(key) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Best-effort distributed lock: succeeds only if the key was absent.
    /// Single-process moka backing makes this a same-process mutual
    /// exclusion primitive, not a cluster-wide lock — sufficient for the
    /// single-instance deployment model this control plane targets
    /// (spec.md §5).
    fn acquire_lock(&self, name: &str, ttl_seconds: u64) -> bool {
        let key = format!("lock:{name}");
        if self.exists(&key) {
            return false;
        }
        self.set_bytes(&key, b"1".to_vec(), Some(ttl_seconds));
        true
    }

    fn release_lock(&self, name: &str) {
        self.delete(&format!("lock:{name}"));
    }
}

impl<T: StateStore + ?Sized> StateStoreExt for T {}

/// One broadcast channel per topic, created lazily on first publish or
/// subscribe and kept for the process lifetime. Bounded at 256 messages;
/// a slow subscriber drops the oldest rather than stalling publishers.
const CHANNEL_CAPACITY: usize = 256;

pub struct MokaStateStore {
    cache: Cache<String, Entry>,
    channels: dashmap_lite::ChannelMap,
    health_alert_seq: AtomicU64,
}

impl MokaStateStore {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .expire_after(PerEntryExpiry)
            .eviction_listener(|_key: Arc<String>, _value: Entry, _cause: RemovalCause| {})
            .build();
        Self {
            cache,
            channels: dashmap_lite::ChannelMap::new(),
            health_alert_seq: AtomicU64::new(0),
        }
    }

    /// Monotonic counter used to tag health-alert notifications so
    /// duplicate transitions within the same tick are distinguishable in
    /// logs (component I uses this, not the cache itself).
    pub fn next_alert_seq(&self) -> u64 {
        self.health_alert_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MokaStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MokaStateStore {
    fn set_bytes(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) {
        self.cache.insert(
            key.to_string(),
            Entry {
                bytes: value,
                ttl: ttl_seconds.map(Duration::from_secs),
            },
        );
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.get(key).map(|e| e.bytes)
    }

    fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }

    fn publish(&self, channel: &str, payload: Value) {
        if let Some(tx) = self.channels.existing(channel) {
            let _ = tx.send(payload);
        }
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Value> {
        self.channels.get_or_create(channel, CHANNEL_CAPACITY).subscribe()
    }
}

/// Minimal sharded map for broadcast senders, named to make clear this is
/// not pulling in the `dashmap` crate — a `Mutex<HashMap<...>>` is plenty
/// for the handful of channel names (`health:*`, `approvals:*`,
/// `workflows:*`) this control plane actually uses.
mod dashmap_lite {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    pub struct ChannelMap {
        inner: Mutex<HashMap<String, broadcast::Sender<serde_json::Value>>>,
    }

    impl ChannelMap {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(HashMap::new()),
            }
        }

        pub fn existing(&self, channel: &str) -> Option<broadcast::Sender<serde_json::Value>> {
            self.inner.lock().unwrap().get(channel).cloned()
        }

        pub fn get_or_create(&self, channel: &str, capacity: usize) -> broadcast::Sender<serde_json::Value> {
            let mut guard = self.inner.lock().unwrap();
            guard
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(capacity).0)
                .clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips_bytes() {
        let store = MokaStateStore::new();
        store.set_bytes("k", b"hello".to_vec(), None);
        assert_eq!(store.get_bytes("k"), Some(b"hello".to_vec()));
    }

    #[test]
    fn delete_removes_the_key() {
        let store = MokaStateStore::new();
        store.set_bytes("k", b"hello".to_vec(), None);
        store.delete("k");
        assert_eq!(store.get_bytes("k"), None);
    }

    #[test]
    fn json_convenience_round_trips() {
        let store = MokaStateStore::new();
        store.set_json("health:device-1", &json!({"status": "ok"}), None).unwrap();
        let value: Value = store.get_json("health:device-1").unwrap().unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn lock_is_exclusive_until_released() {
        let store = MokaStateStore::new();
        assert!(store.acquire_lock("scheduler-tick", 30));
        assert!(!store.acquire_lock("scheduler-tick", 30));
        store.release_lock("scheduler-tick");
        assert!(store.acquire_lock("scheduler-tick", 30));
    }

    #[tokio::test]
    async fn publish_reaches_existing_subscribers() {
        let store = MokaStateStore::new();
        let mut rx = store.subscribe("health:transitions");
        store.publish("health:transitions", json!({"device": "sw-01", "to": "down"}));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg["device"], "sw-01");
    }

    #[test]
    fn publish_with_no_subscribers_is_a_no_op() {
        let store = MokaStateStore::new();
        store.publish("nobody-listening", json!({"x": 1}));
    }
}
