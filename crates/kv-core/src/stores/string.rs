use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use thiserror::Error;

/// INCR/DECR target that does not hold a base-10 signed 64-bit integer.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("value is not an integer or out of range")]
pub struct NotAnInteger;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    /// Bumped on every write to the key.  A scheduled expiry captures the
    /// generation it belongs to and deletes only if it still matches, so
    /// a stale timer can never remove a newer value.
    generation: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Mapping key → byte string with optional millisecond expiry.
///
/// Expired entries are dropped lazily by any read that observes them and
/// eagerly by a deletion task scheduled at insert time.
#[derive(Debug, Clone, Default)]
pub struct StringStore {
    inner: Arc<RwLock<HashMap<Vec<u8>, Entry>>>,
}

impl StringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `value` under `key`, replacing any prior value and expiry.
    /// With `expire_ms` set, a background task releases the entry at the
    /// deadline.
    pub async fn set(&self, key: Vec<u8>, value: Vec<u8>, expire_ms: Option<u64>) {
        let expires_at = expire_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let generation = {
            let mut map = self.inner.write().await;
            let generation = map.get(&key).map_or(0, |e| e.generation) + 1;
            map.insert(
                key.clone(),
                Entry {
                    value,
                    expires_at,
                    generation,
                },
            );
            generation
        };
        if let Some(deadline) = expires_at {
            let store = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                store.remove_if_generation(&key, generation).await;
            });
        }
    }

    async fn remove_if_generation(&self, key: &[u8], generation: u64) {
        let mut map = self.inner.write().await;
        if map.get(key).is_some_and(|e| e.generation == generation) {
            map.remove(key);
        }
    }

    pub async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let map = self.inner.read().await;
            match map.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        // Lazy reap of the dead entry; re-checked under the write lock.
        let mut map = self.inner.write().await;
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }
        None
    }

    /// Adjust the integer stored at `key` by `delta` and return the new
    /// value.  A missing (or expired) key counts from zero.
    pub async fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64, NotAnInteger> {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let current = match map.get(key) {
            Some(entry) if !entry.is_expired(now) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(NotAnInteger)?,
            _ => 0,
        };
        let next = current.checked_add(delta).ok_or(NotAnInteger)?;
        let generation = map.get(key).map_or(0, |e| e.generation) + 1;
        map.insert(
            key.to_vec(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at: None,
                generation,
            },
        );
        Ok(next)
    }

    /// All live keys, in arbitrary order.
    pub async fn keys(&self) -> Vec<Vec<u8>> {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn contains(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    pub async fn remove(&self, key: &[u8]) -> bool {
        self.inner.write().await.remove(key).is_some()
    }
}
