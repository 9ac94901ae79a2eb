use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use kv_core::snapshot::SnapshotEntry;
use kv_core::{ListStore, SortedSetStore, StreamStore, StringStore};
use resp_protocol::{encode_command, Frame};

use crate::ServerConfig;

/// Handle for pushing raw bytes to a connection's writer task.
pub type OutboundTx = UnboundedSender<Vec<u8>>;

#[derive(Debug)]
struct Subscriber {
    channels: HashSet<Vec<u8>>,
    tx: OutboundTx,
}

#[derive(Debug)]
struct Replica {
    conn_id: u64,
    tx: OutboundTx,
}

/// The replica fan-out and the propagation byte counter share one lock,
/// so a registered replica can never miss bytes counted before it joined.
#[derive(Debug, Default)]
struct ReplicaSet {
    replicas: Vec<Replica>,
    master_repl_offset: u64,
}

/// Process-wide server state: the typed stores plus the connection
/// registries.  Everything is cheap to clone; clones share the state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// 40-hex replication id, stable for the process lifetime.
    pub replid: Arc<str>,
    pub strings: StringStore,
    pub lists: ListStore,
    pub streams: StreamStore,
    pub sorted_sets: SortedSetStore,
    subscribers: Arc<Mutex<HashMap<u64, Subscriber>>>,
    replication: Arc<Mutex<ReplicaSet>>,
    ack_offsets: Arc<Mutex<HashMap<u64, u64>>>,
    /// Serializes (execute write → propagate) so replicas observe writes
    /// in one global order.
    write_guard: Arc<Mutex<()>>,
    /// Bytes of master traffic applied so far when running as a replica.
    replica_offset: Arc<AtomicU64>,
    next_conn_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let mut id_bytes = [0u8; 20];
        rand::Rng::fill(&mut rand::thread_rng(), &mut id_bytes[..]);
        AppState {
            config: Arc::new(config),
            replid: hex::encode(id_bytes).into(),
            strings: StringStore::new(),
            lists: ListStore::new(),
            streams: StreamStore::new(),
            sorted_sets: SortedSetStore::new(),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            replication: Arc::new(Mutex::new(ReplicaSet::default())),
            ack_offsets: Arc::new(Mutex::new(HashMap::new())),
            write_guard: Arc::new(Mutex::new(())),
            replica_offset: Arc::new(AtomicU64::new(0)),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn is_master(&self) -> bool {
        self.config.replica_of.is_none()
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Take the write-serialization permit.  Held across execute +
    /// propagate for a single write (or a whole EXEC batch).
    pub async fn write_permit(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.write_guard).lock_owned().await
    }

    /// Install snapshot entries into the string store, skipping those
    /// already past their deadline.  Returns the number loaded.
    pub async fn load_snapshot(&self, entries: Vec<SnapshotEntry>) -> usize {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let mut loaded = 0;
        for entry in entries {
            match entry.expires_at_ms {
                Some(deadline) if deadline <= now_ms => continue,
                Some(deadline) => {
                    self.strings
                        .set(entry.key, entry.value, Some(deadline - now_ms))
                        .await;
                }
                None => self.strings.set(entry.key, entry.value, None).await,
            }
            loaded += 1;
        }
        loaded
    }

    // -----------------------------------------------------------------------
    // Pub/sub registry
    // -----------------------------------------------------------------------

    /// Add a channel to the connection's subscription set; returns the
    /// set size afterwards.
    pub async fn subscribe(&self, conn_id: u64, channel: Vec<u8>, tx: &OutboundTx) -> usize {
        let mut map = self.subscribers.lock().await;
        let subscriber = map.entry(conn_id).or_insert_with(|| Subscriber {
            channels: HashSet::new(),
            tx: tx.clone(),
        });
        subscriber.channels.insert(channel);
        subscriber.channels.len()
    }

    /// Drop a channel; returns the set size afterwards.  An emptied set
    /// removes the registry entry (the connection leaves subscribed
    /// mode).
    pub async fn unsubscribe(&self, conn_id: u64, channel: &[u8]) -> usize {
        let mut map = self.subscribers.lock().await;
        let Some(subscriber) = map.get_mut(&conn_id) else {
            return 0;
        };
        subscriber.channels.remove(channel);
        let remaining = subscriber.channels.len();
        if remaining == 0 {
            map.remove(&conn_id);
        }
        remaining
    }

    /// Deliver `message` to every connection subscribed to `channel`;
    /// returns how many deliveries were handed to a live writer.
    pub async fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let payload = Frame::Array(vec![
            Frame::bulk(&b"message"[..]),
            Frame::bulk(channel),
            Frame::bulk(message),
        ])
        .to_bytes();

        let map = self.subscribers.lock().await;
        map.values()
            .filter(|s| s.channels.contains(channel))
            .filter(|s| s.tx.send(payload.clone()).is_ok())
            .count()
    }

    // -----------------------------------------------------------------------
    // Replication registry (master side)
    // -----------------------------------------------------------------------

    /// Add a connection to the replica fan-out after its PSYNC handoff.
    pub async fn register_replica(&self, conn_id: u64, tx: OutboundTx) {
        let mut set = self.replication.lock().await;
        set.replicas.push(Replica { conn_id, tx });
        debug!(conn_id, total = set.replicas.len(), "replica registered");
    }

    /// Serialize `args` as a command array and write it to every replica
    /// in registration order.  Bumps the master offset by the encoded
    /// length; replicas whose writer is gone are dropped along with
    /// their ack entries.
    pub async fn propagate<A: AsRef<[u8]>>(&self, args: &[A]) {
        let encoded = encode_command(args);
        let failed: Vec<u64> = {
            let mut set = self.replication.lock().await;
            set.master_repl_offset += encoded.len() as u64;
            let failed: Vec<u64> = set
                .replicas
                .iter()
                .filter(|r| r.tx.send(encoded.clone()).is_err())
                .map(|r| r.conn_id)
                .collect();
            set.replicas.retain(|r| !failed.contains(&r.conn_id));
            failed
        };
        if !failed.is_empty() {
            warn!(count = failed.len(), "dropping unreachable replicas");
            let mut offsets = self.ack_offsets.lock().await;
            for conn_id in failed {
                offsets.remove(&conn_id);
            }
        }
    }

    pub async fn master_repl_offset(&self) -> u64 {
        self.replication.lock().await.master_repl_offset
    }

    pub async fn replica_count(&self) -> usize {
        self.replication.lock().await.replicas.len()
    }

    /// Record a `REPLCONF ACK` from a replica.
    pub async fn record_ack(&self, conn_id: u64, offset: u64) {
        self.ack_offsets.lock().await.insert(conn_id, offset);
    }

    /// How many replicas have acknowledged at least `offset` bytes.
    pub async fn acked_at_least(&self, offset: u64) -> usize {
        self.ack_offsets
            .lock()
            .await
            .values()
            .filter(|acked| **acked >= offset)
            .count()
    }

    // -----------------------------------------------------------------------
    // Replica-side applied offset
    // -----------------------------------------------------------------------

    pub fn replica_offset(&self) -> u64 {
        self.replica_offset.load(Ordering::Acquire)
    }

    pub fn set_replica_offset(&self, offset: u64) {
        self.replica_offset.store(offset, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Connection teardown
    // -----------------------------------------------------------------------

    /// Remove every trace of a closed connection: subscriptions, replica
    /// registration, ack offset.
    pub async fn connection_closed(&self, conn_id: u64) {
        self.replication
            .lock()
            .await
            .replicas
            .retain(|r| r.conn_id != conn_id);
        self.ack_offsets.lock().await.remove(&conn_id);
        self.subscribers.lock().await.remove(&conn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_state() -> AppState {
        AppState::new(ServerConfig {
            port: 0,
            replica_of: None,
            dir: None,
            dbfilename: None,
        })
    }

    #[tokio::test]
    async fn replid_is_forty_hex_chars() {
        let state = test_state();
        assert_eq!(state.replid.len(), 40);
        assert!(state.replid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn subscription_counts_track_the_channel_set() {
        let state = test_state();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(state.subscribe(7, b"a".to_vec(), &tx).await, 1);
        assert_eq!(state.subscribe(7, b"b".to_vec(), &tx).await, 2);
        assert_eq!(state.subscribe(7, b"a".to_vec(), &tx).await, 2);
        assert_eq!(state.unsubscribe(7, b"a").await, 1);
        assert_eq!(state.unsubscribe(7, b"b").await, 0);
        assert_eq!(state.unsubscribe(7, b"never").await, 0);
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_subscribers() {
        let state = test_state();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        state.subscribe(1, b"news".to_vec(), &tx1).await;
        state.subscribe(2, b"other".to_vec(), &tx2).await;

        let delivered = state.publish(b"news", b"hi").await;
        assert_eq!(delivered, 1);
        assert_eq!(
            rx1.recv().await.unwrap(),
            b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$2\r\nhi\r\n".to_vec()
        );
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn propagate_counts_bytes_and_drops_dead_replicas() {
        let state = test_state();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        state.register_replica(1, tx_live).await;
        state.register_replica(2, tx_dead).await;
        state.record_ack(2, 0).await;
        drop(rx_dead);

        state.propagate(&["SET", "x", "1"]).await;

        let wire = rx_live.recv().await.unwrap();
        assert_eq!(wire, b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n1\r\n".to_vec());
        assert_eq!(state.master_repl_offset().await, wire.len() as u64);
        assert_eq!(state.replica_count().await, 1);
        // The dead replica's ack entry went with it.
        assert_eq!(state.acked_at_least(0).await, 0);
    }

    #[tokio::test]
    async fn ack_counting() {
        let state = test_state();
        state.record_ack(1, 100).await;
        state.record_ack(2, 50).await;
        assert_eq!(state.acked_at_least(60).await, 1);
        assert_eq!(state.acked_at_least(50).await, 2);
        assert_eq!(state.acked_at_least(101).await, 0);
    }

    #[tokio::test]
    async fn connection_closed_clears_every_registry() {
        let state = test_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.subscribe(9, b"c".to_vec(), &tx).await;
        state.register_replica(9, tx.clone()).await;
        state.record_ack(9, 10).await;

        state.connection_closed(9).await;

        assert_eq!(state.replica_count().await, 0);
        assert_eq!(state.acked_at_least(0).await, 0);
        assert_eq!(state.publish(b"c", b"m").await, 0);
    }
}
