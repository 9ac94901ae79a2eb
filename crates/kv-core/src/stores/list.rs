use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::time::{Duration, Instant};

use super::slice_bounds;

/// How long a blocked pop waits before re-checking the list even without
/// a push signal.
const BLOCK_RECHECK: Duration = Duration::from_millis(100);

/// Mapping key → ordered sequence of byte strings.
///
/// A key that drains to empty stays present; callers that care about
/// existence use `exists`, not emptiness.
#[derive(Debug, Clone, Default)]
pub struct ListStore {
    inner: Arc<RwLock<HashMap<Vec<u8>, VecDeque<Vec<u8>>>>>,
    /// Pinged on every push so blocked `blpop` callers re-check.
    wakeup: Arc<Notify>,
}

impl ListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `values` in argument order; returns the new length.
    pub async fn lpush(&self, key: &[u8], values: Vec<Vec<u8>>) -> usize {
        let len = {
            let mut map = self.inner.write().await;
            let list = map.entry(key.to_vec()).or_default();
            for value in values {
                list.push_front(value);
            }
            list.len()
        };
        self.wakeup.notify_waiters();
        len
    }

    /// Append `values`; returns the new length.
    pub async fn rpush(&self, key: &[u8], values: Vec<Vec<u8>>) -> usize {
        let len = {
            let mut map = self.inner.write().await;
            let list = map.entry(key.to_vec()).or_default();
            for value in values {
                list.push_back(value);
            }
            list.len()
        };
        self.wakeup.notify_waiters();
        len
    }

    /// Pop up to `count` items from the front.  Empty vec when the key is
    /// missing or empty.
    pub async fn lpop(&self, key: &[u8], count: usize) -> Vec<Vec<u8>> {
        let mut map = self.inner.write().await;
        let Some(list) = map.get_mut(key) else {
            return Vec::new();
        };
        let take = count.min(list.len());
        list.drain(..take).collect()
    }

    pub async fn lrange(&self, key: &[u8], start: i64, end: i64) -> Vec<Vec<u8>> {
        let map = self.inner.read().await;
        let Some(list) = map.get(key) else {
            return Vec::new();
        };
        match slice_bounds(list.len(), start, end) {
            Some((lo, hi)) => list.iter().skip(lo).take(hi - lo + 1).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn llen(&self, key: &[u8]) -> usize {
        self.inner.read().await.get(key).map_or(0, VecDeque::len)
    }

    pub async fn exists(&self, key: &[u8]) -> bool {
        self.inner.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &[u8]) -> bool {
        self.inner.write().await.remove(key).is_some()
    }

    /// Pop the front item, waiting until one is pushed or `timeout`
    /// elapses.  `None` timeout waits forever; `None` result is a timeout.
    pub async fn blpop(&self, key: &[u8], timeout: Option<Duration>) -> Option<Vec<u8>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // Register for the wakeup before checking, so a push landing
            // between the check and the wait is not missed.
            let notified = self.wakeup.notified();
            tokio::pin!(notified);

            if let Some(value) = self.lpop(key, 1).await.into_iter().next() {
                return Some(value);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    (deadline - now).min(BLOCK_RECHECK)
                }
                None => BLOCK_RECHECK,
            };
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn push_pop_and_range() {
        let store = ListStore::new();
        assert_eq!(store.rpush(b"l", vec![b"a".to_vec(), b"b".to_vec()]).await, 2);
        assert_eq!(store.lpush(b"l", vec![b"z".to_vec()]).await, 3);

        assert_eq!(
            store.lrange(b"l", 0, -1).await,
            vec![b"z".to_vec(), b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(store.lpop(b"l", 2).await, vec![b"z".to_vec(), b"a".to_vec()]);
        assert_eq!(store.llen(b"l").await, 1);
    }

    #[tokio::test]
    async fn lpush_reverses_argument_order() {
        let store = ListStore::new();
        store
            .lpush(b"l", vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await;
        assert_eq!(
            store.lrange(b"l", 0, -1).await,
            vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );
    }

    #[tokio::test]
    async fn drained_list_keeps_its_key() {
        let store = ListStore::new();
        store.rpush(b"l", vec![b"only".to_vec()]).await;
        store.lpop(b"l", 1).await;
        assert!(store.exists(b"l").await);
        assert_eq!(store.llen(b"l").await, 0);
    }

    #[tokio::test]
    async fn blpop_wakes_on_push() {
        let store = ListStore::new();
        let waiter = store.clone();
        let handle = tokio::spawn(async move { waiter.blpop(b"q", None).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.rpush(b"q", vec![b"item".to_vec()]).await;

        let popped = timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .expect("join");
        assert_eq!(popped, Some(b"item".to_vec()));
    }

    #[tokio::test]
    async fn blpop_times_out_with_none() {
        let store = ListStore::new();
        let popped = store
            .blpop(b"empty", Some(Duration::from_millis(50)))
            .await;
        assert_eq!(popped, None);
    }
}
