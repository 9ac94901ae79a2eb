use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::slice_bounds;
use crate::geo;

/// One sorted set: an ordered sequence by `(score, member)` plus a
/// member → score index.  Scores are parse-validated upstream and never
/// NaN, so `total_cmp` gives the expected ordering.
#[derive(Debug, Default)]
struct SortedSet {
    entries: Vec<(f64, Vec<u8>)>,
    index: HashMap<Vec<u8>, f64>,
}

impl SortedSet {
    fn position(&self, score: f64, member: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(s, m)| s.total_cmp(&score).then_with(|| m.as_slice().cmp(member)))
    }

    /// Insert or re-score a member.  Returns true only for a brand-new
    /// member; a same-score re-add is a no-op.
    fn add(&mut self, score: f64, member: Vec<u8>) -> bool {
        if let Some(&old_score) = self.index.get(&member) {
            if old_score == score {
                return false;
            }
            if let Ok(at) = self.position(old_score, &member) {
                self.entries.remove(at);
            }
            let at = self.position(score, &member).unwrap_err();
            self.entries.insert(at, (score, member.clone()));
            self.index.insert(member, score);
            return false;
        }
        let at = self.position(score, &member).unwrap_err();
        self.entries.insert(at, (score, member.clone()));
        self.index.insert(member, score);
        true
    }

    fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.index.get(member)?;
        self.position(score, member).ok()
    }

    fn remove(&mut self, member: &[u8]) -> bool {
        let Some(score) = self.index.remove(member) else {
            return false;
        };
        if let Ok(at) = self.position(score, member) {
            self.entries.remove(at);
        }
        true
    }
}

/// Mapping key → sorted set.  Geo commands store their encoded positions
/// through the same operations.
#[derive(Debug, Clone, Default)]
pub struct SortedSetStore {
    inner: Arc<RwLock<HashMap<Vec<u8>, SortedSet>>>,
}

impl SortedSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `(score, member)` pairs; returns how many members were newly
    /// inserted (re-scores do not count).
    pub async fn zadd(&self, key: &[u8], pairs: Vec<(f64, Vec<u8>)>) -> usize {
        let mut map = self.inner.write().await;
        let set = map.entry(key.to_vec()).or_default();
        pairs
            .into_iter()
            .filter(|(score, member)| set.add(*score, member.clone()))
            .count()
    }

    /// 0-based position of `member` in `(score, member)` order.
    pub async fn zrank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        self.inner.read().await.get(key)?.rank(member)
    }

    pub async fn zrange(&self, key: &[u8], start: i64, end: i64) -> Vec<Vec<u8>> {
        let map = self.inner.read().await;
        let Some(set) = map.get(key) else {
            return Vec::new();
        };
        match slice_bounds(set.entries.len(), start, end) {
            Some((lo, hi)) => set.entries[lo..=hi]
                .iter()
                .map(|(_, member)| member.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub async fn zcard(&self, key: &[u8]) -> usize {
        self.inner.read().await.get(key).map_or(0, |set| set.entries.len())
    }

    pub async fn zscore(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        self.inner.read().await.get(key)?.index.get(member).copied()
    }

    /// Remove one member; returns whether it existed.
    pub async fn zrem(&self, key: &[u8], member: &[u8]) -> bool {
        self.inner
            .write()
            .await
            .get_mut(key)
            .is_some_and(|set| set.remove(member))
    }

    pub async fn exists(&self, key: &[u8]) -> bool {
        self.inner.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &[u8]) -> bool {
        self.inner.write().await.remove(key).is_some()
    }

    /// Members whose geohash-decoded position lies within `radius_m`
    /// meters of `(longitude, latitude)`, in set order.
    pub async fn geosearch(
        &self,
        key: &[u8],
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> Vec<Vec<u8>> {
        let map = self.inner.read().await;
        let Some(set) = map.get(key) else {
            return Vec::new();
        };
        set.entries
            .iter()
            .filter(|(score, _)| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let (lon, lat) = geo::decode(*score as u64);
                geo::haversine(longitude, latitude, lon, lat) <= radius_m
            })
            .map(|(_, member)| member.clone())
            .collect()
    }
}
