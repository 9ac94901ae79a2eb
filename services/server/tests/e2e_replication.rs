//! End-to-end replication.
//!
//! Two lanes: a byte-level lane where the test itself plays the replica
//! against a real master (handshake framing, propagation bytes, GETACK),
//! and a convergence lane with a real master and a real replica process
//! wired together in-process.

mod common;

use common::{
    connect, expect_bytes, read_available, read_exactly, read_line, roundtrip, send, start_master,
    start_replica_of,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Drive the replica side of the handshake by hand; returns the stream
/// with the snapshot consumed.
async fn fake_replica_handshake(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = connect(addr).await;

    roundtrip(&mut stream, &["PING"], b"+PONG\r\n").await;
    roundtrip(&mut stream, &["REPLCONF", "listening-port", "6380"], b"+OK\r\n").await;
    roundtrip(&mut stream, &["REPLCONF", "capa", "psync2"], b"+OK\r\n").await;

    send(&mut stream, &["PSYNC", "?", "-1"]).await;
    let resync = read_line(&mut stream).await;
    let mut parts = resync.split(' ');
    assert_eq!(parts.next(), Some("+FULLRESYNC"));
    let replid = parts.next().expect("replid");
    assert_eq!(replid.len(), 40);
    assert!(replid.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(parts.next(), Some("0"));

    // `$<len>\r\n` then exactly len snapshot bytes, no trailing CRLF.
    let header = read_line(&mut stream).await;
    let length: usize = header.strip_prefix('$').expect("bulk header").parse().unwrap();
    let snapshot = read_exactly(&mut stream, length).await;
    assert_eq!(snapshot.len(), length);
    assert!(snapshot.starts_with(b"REDIS"));

    stream
}

#[tokio::test]
async fn psync_hands_off_a_snapshot_and_registers_the_replica() {
    let addr = start_master().await;
    let replica = fake_replica_handshake(addr).await;

    // Nothing further arrives unprompted.
    drop(replica);
}

#[tokio::test]
async fn writes_propagate_as_exact_command_arrays() {
    let addr = start_master().await;
    let mut replica = fake_replica_handshake(addr).await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["SET", "x", "1"], b"+OK\r\n").await;
    expect_bytes(&mut replica, b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n1\r\n").await;

    // Reads do not propagate.
    roundtrip(&mut client, &["GET", "x"], b"$1\r\n1\r\n").await;
    roundtrip(&mut client, &["RPUSH", "l", "a"], b":1\r\n").await;
    expect_bytes(&mut replica, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nl\r\n$1\r\na\r\n").await;
}

#[tokio::test]
async fn wait_counts_acknowledged_replicas() {
    let addr = start_master().await;
    let mut replica = fake_replica_handshake(addr).await;
    let mut client = connect(addr).await;

    // No writes yet: WAIT replies with the connected replica count.
    roundtrip(&mut client, &["WAIT", "0", "100"], b":1\r\n").await;

    let set_wire = b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n1\r\n";
    roundtrip(&mut client, &["SET", "x", "1"], b"+OK\r\n").await;
    expect_bytes(&mut replica, set_wire).await;

    // WAIT triggers a GETACK; acknowledge with the propagated byte count.
    send(&mut client, &["WAIT", "1", "2000"]).await;
    expect_bytes(
        &mut replica,
        b"*3\r\n$8\r\nREPLCONF\r\n$6\r\nGETACK\r\n$1\r\n*\r\n",
    )
    .await;
    let offset = set_wire.len().to_string();
    send(&mut replica, &["REPLCONF", "ACK", &offset]).await;

    timeout(Duration::from_secs(2), expect_bytes(&mut client, b":1\r\n"))
        .await
        .expect("WAIT should resolve after the ack");
}

#[tokio::test]
async fn wait_times_out_with_the_current_ack_count() {
    let addr = start_master().await;
    let mut replica = fake_replica_handshake(addr).await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["SET", "x", "1"], b"+OK\r\n").await;
    let _ = read_available(&mut replica, Duration::from_millis(200)).await;

    // The fake replica never acks; WAIT must give up at the deadline.
    send(&mut client, &["WAIT", "1", "150"]).await;
    timeout(Duration::from_secs(2), expect_bytes(&mut client, b":0\r\n"))
        .await
        .expect("WAIT should time out");
}

#[tokio::test]
async fn info_replication_reports_role_and_offset() {
    let master_addr = start_master().await;
    let mut client = connect(master_addr).await;

    send(&mut client, &["INFO", "replication"]).await;
    let reply = read_available(&mut client, Duration::from_millis(300)).await;
    let text = String::from_utf8_lossy(&reply).into_owned();
    assert!(text.contains("role:master"), "reply was {text:?}");
    assert!(text.contains("master_repl_offset:0"), "reply was {text:?}");
    assert!(text.contains("master_replid:"), "reply was {text:?}");

    let replica_addr = start_replica_of(master_addr).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut replica_client = connect(replica_addr).await;
    send(&mut replica_client, &["INFO", "replication"]).await;
    let reply = read_available(&mut replica_client, Duration::from_millis(300)).await;
    let text = String::from_utf8_lossy(&reply).into_owned();
    assert!(text.contains("role:slave"), "reply was {text:?}");
}

#[tokio::test]
async fn real_replica_converges_with_the_master() {
    let master_addr = start_master().await;
    let replica_addr = start_replica_of(master_addr).await;

    // Let the handshake finish.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut client = connect(master_addr).await;
    roundtrip(&mut client, &["SET", "foo", "bar"], b"+OK\r\n").await;
    roundtrip(&mut client, &["RPUSH", "l", "a", "b"], b":2\r\n").await;
    roundtrip(&mut client, &["XADD", "s", "1-1", "k", "v"], b"$3\r\n1-1\r\n").await;
    roundtrip(&mut client, &["ZADD", "z", "1", "m"], b":1\r\n").await;
    roundtrip(&mut client, &["INCR", "n"], b":1\r\n").await;

    // WAIT 1 0 returns once the replica has acknowledged everything.
    send(&mut client, &["WAIT", "1", "0"]).await;
    timeout(Duration::from_secs(3), expect_bytes(&mut client, b":1\r\n"))
        .await
        .expect("replica should acknowledge");

    let mut reader = connect(replica_addr).await;
    roundtrip(&mut reader, &["GET", "foo"], b"$3\r\nbar\r\n").await;
    roundtrip(
        &mut reader,
        &["LRANGE", "l", "0", "-1"],
        b"*2\r\n$1\r\na\r\n$1\r\nb\r\n",
    )
    .await;
    roundtrip(
        &mut reader,
        &["XRANGE", "s", "-", "+"],
        b"*1\r\n*2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nk\r\n$1\r\nv\r\n",
    )
    .await;
    roundtrip(&mut reader, &["ZRANGE", "z", "0", "-1"], b"*1\r\n$1\r\nm\r\n").await;
    roundtrip(&mut reader, &["GET", "n"], b"$1\r\n1\r\n").await;
}

#[tokio::test]
async fn exec_writes_propagate_in_queue_order() {
    let addr = start_master().await;
    let mut replica = fake_replica_handshake(addr).await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["MULTI"], b"+OK\r\n").await;
    roundtrip(&mut client, &["SET", "a", "1"], b"+QUEUED\r\n").await;
    roundtrip(&mut client, &["INCR", "a"], b"+QUEUED\r\n").await;
    roundtrip(&mut client, &["EXEC"], b"*2\r\n+OK\r\n:2\r\n").await;

    expect_bytes(
        &mut replica,
        b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$4\r\nINCR\r\n$1\r\na\r\n",
    )
    .await;
}
