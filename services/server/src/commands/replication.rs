//! Master-side replication commands: the PSYNC handoff, REPLCONF
//! bookkeeping, and WAIT.

use tokio::time::{Duration, Instant};
use tracing::info;

use resp_protocol::{encode_command, Frame};

use super::{parse_i64, parse_u64, wrong_arity, Reply};
use crate::session::Session;

/// A fixed empty snapshot, enough for a replica to accept FULLRESYNC.
const EMPTY_SNAPSHOT_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

const ACK_POLL: Duration = Duration::from_millis(10);

pub(crate) async fn replconf(session: &Session, rest: &[Vec<u8>]) -> Reply {
    match rest.first().map(|raw| raw.to_ascii_uppercase()) {
        Some(sub) if sub == b"GETACK" => {
            // Mirrors the master-link path: answer with the bytes applied
            // so far.
            let offset = session.state.replica_offset().to_string();
            Reply::Raw(encode_command(&["REPLCONF", "ACK", offset.as_str()]))
        }
        Some(sub) if sub == b"ACK" => {
            if let Some(offset) = rest.get(1).and_then(|raw| parse_u64(raw)) {
                session.state.record_ack(session.conn_id, offset).await;
            }
            // ACK is one-way; no reply on this connection.
            Reply::None
        }
        // listening-port / capa during the handshake.
        _ => Frame::ok().into(),
    }
}

/// `PSYNC ? -1`: reply FULLRESYNC, hand over a snapshot as a bulk with
/// no trailing CRLF, and join the connection to the replica fan-out.
pub(crate) async fn psync(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() != 2 {
        return wrong_arity("PSYNC");
    }
    let snapshot = hex::decode(EMPTY_SNAPSHOT_HEX).expect("constant is valid hex");

    let mut handoff = Vec::new();
    handoff.extend_from_slice(format!("+FULLRESYNC {} 0\r\n", session.state.replid).as_bytes());
    handoff.extend_from_slice(format!("${}\r\n", snapshot.len()).as_bytes());
    handoff.extend_from_slice(&snapshot);
    session.send_raw(handoff);

    session
        .state
        .register_replica(session.conn_id, session.tx.clone())
        .await;
    info!(conn_id = session.conn_id, "replica requested full resync");
    Reply::None
}

/// `WAIT numreplicas timeout_ms`: count replicas whose acknowledged
/// offset has caught up to the propagation offset observed at entry.
pub(crate) async fn wait(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [raw_count, raw_timeout] = rest else {
        return wrong_arity("WAIT");
    };
    let (Some(want), Some(timeout_ms)) = (parse_i64(raw_count), parse_u64(raw_timeout)) else {
        return Frame::error("ERR invalid WAIT arguments").into();
    };

    let state = &session.state;
    // The GETACK below bumps the offset, so the target is captured first.
    let target = state.master_repl_offset().await;
    if target == 0 {
        let connected = state.replica_count().await;
        return Frame::Integer(i64::try_from(connected).unwrap_or(i64::MAX)).into();
    }

    state.propagate(&["REPLCONF", "GETACK", "*"]).await;

    let started = Instant::now();
    loop {
        let acked = state.acked_at_least(target).await;
        let acked_i = i64::try_from(acked).unwrap_or(i64::MAX);
        if acked_i >= want {
            return Frame::Integer(acked_i).into();
        }
        if timeout_ms != 0 && started.elapsed() >= Duration::from_millis(timeout_ms) {
            return Frame::Integer(acked_i).into();
        }
        tokio::time::sleep(ACK_POLL).await;
    }
}
