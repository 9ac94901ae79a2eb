use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Notify, RwLock};
use tokio::time::{Duration, Instant};

use thiserror::Error;

const BLOCK_RECHECK: Duration = Duration::from_millis(100);

/// Entry id: milliseconds plus a per-millisecond sequence, totally
/// ordered and rendered `"ms-seq"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// Parse `"ms-seq"`.  Anything else is `None`.
    pub fn parse(text: &str) -> Option<StreamId> {
        let (ms, seq) = text.split_once('-')?;
        Some(StreamId {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// The id argument of an XADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// `*` — current wall-clock milliseconds, generated sequence.
    Auto,
    /// `ms-*` — fixed milliseconds, generated sequence.
    AutoSeq(u64),
    /// `ms-seq` as given.
    Explicit(StreamId),
}

impl IdSpec {
    pub fn parse(text: &str) -> Option<IdSpec> {
        if text == "*" {
            return Some(IdSpec::Auto);
        }
        let (ms, seq) = text.split_once('-')?;
        let ms = ms.parse().ok()?;
        if seq == "*" {
            Some(IdSpec::AutoSeq(ms))
        } else {
            Some(IdSpec::Explicit(StreamId {
                ms,
                seq: seq.parse().ok()?,
            }))
        }
    }
}

/// One bound of an XRANGE query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    /// `-`
    Min,
    /// `+`
    Max,
    Id(StreamId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    /// Field/value pairs in insertion order.
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamIdError {
    #[error("The ID specified in XADD must be greater than 0-0")]
    NotAboveZero,
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    NotAboveTop,
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Mapping key → append-only log of entries with strictly increasing ids.
#[derive(Debug, Clone, Default)]
pub struct StreamStore {
    inner: Arc<RwLock<HashMap<Vec<u8>, Vec<StreamEntry>>>>,
    wakeup: Arc<Notify>,
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, resolving `*`/`ms-*` ids against the stream's
    /// current top entry.  Returns the id actually used.
    pub async fn xadd(
        &self,
        key: &[u8],
        spec: IdSpec,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<StreamId, StreamIdError> {
        let mut map = self.inner.write().await;
        let last = map.get(key).and_then(|log| log.last()).map(|e| e.id);
        let id = match spec {
            IdSpec::Auto => generate_id(wall_clock_ms(), last),
            IdSpec::AutoSeq(ms) => generate_id(ms, last),
            IdSpec::Explicit(id) => id,
        };
        if id == StreamId::ZERO {
            return Err(StreamIdError::NotAboveZero);
        }
        if last.is_some_and(|last| id <= last) {
            return Err(StreamIdError::NotAboveTop);
        }
        map.entry(key.to_vec())
            .or_default()
            .push(StreamEntry { id, fields });
        drop(map);
        self.wakeup.notify_waiters();
        Ok(id)
    }

    /// Entries with `start <= id <= end`.
    pub async fn xrange(&self, key: &[u8], start: RangeBound, end: RangeBound) -> Vec<StreamEntry> {
        let map = self.inner.read().await;
        let Some(log) = map.get(key) else {
            return Vec::new();
        };
        log.iter()
            .filter(|entry| {
                let after_start = match start {
                    RangeBound::Min => true,
                    RangeBound::Max => false,
                    RangeBound::Id(id) => entry.id >= id,
                };
                let before_end = match end {
                    RangeBound::Min => false,
                    RangeBound::Max => true,
                    RangeBound::Id(id) => entry.id <= id,
                };
                after_start && before_end
            })
            .cloned()
            .collect()
    }

    /// For each `(key, after)` query, the entries with id strictly greater
    /// than `after`.  Streams with nothing new are omitted.
    pub async fn xread(&self, queries: &[(Vec<u8>, StreamId)]) -> Vec<(Vec<u8>, Vec<StreamEntry>)> {
        let map = self.inner.read().await;
        let mut results = Vec::new();
        for (key, after) in queries {
            let Some(log) = map.get(key) else {
                continue;
            };
            let entries: Vec<StreamEntry> = log
                .iter()
                .filter(|entry| entry.id > *after)
                .cloned()
                .collect();
            if !entries.is_empty() {
                results.push((key.clone(), entries));
            }
        }
        results
    }

    /// As `xread`, but waits until at least one stream has new entries or
    /// `timeout` elapses.  `None` timeout waits forever; `None` result is
    /// a timeout.
    pub async fn xread_block(
        &self,
        queries: &[(Vec<u8>, StreamId)],
        timeout: Option<Duration>,
    ) -> Option<Vec<(Vec<u8>, Vec<StreamEntry>)>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);

            let results = self.xread(queries).await;
            if !results.is_empty() {
                return Some(results);
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

    /// The id of the stream's top entry, `0-0` when absent or empty.
    pub async fn last_id(&self, key: &[u8]) -> StreamId {
        self.inner
            .read()
            .await
            .get(key)
            .and_then(|log| log.last())
            .map_or(StreamId::ZERO, |entry| entry.id)
    }

    pub async fn exists(&self, key: &[u8]) -> bool {
        self.inner.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &[u8]) -> bool {
        self.inner.write().await.remove(key).is_some()
    }
}

/// Sequence generation for `*` and `ms-*`: continue the top entry's
/// sequence when the milliseconds match, otherwise start at 0 — except
/// that a brand-new stream at ms 0 starts at 1 (0-0 is reserved).
fn generate_id(ms: u64, last: Option<StreamId>) -> StreamId {
    let seq = match last {
        Some(last) if last.ms == ms => last.seq + 1,
        Some(_) => 0,
        None => u64::from(ms == 0),
    };
    StreamId { ms, seq }
}
