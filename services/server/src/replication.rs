//! Replica-side link to the master.
//!
//! # Protocol
//! 1. Connect to the master over TCP
//! 2. Send `PING`; expect `+PONG`
//! 3. Send `REPLCONF listening-port <port>`; expect `+OK`
//! 4. Send `REPLCONF capa psync2`; expect `+OK`
//! 5. Send `PSYNC ? -1`; expect `+FULLRESYNC <replid> <offset>` followed
//!    by the snapshot as `$<len>\r\n<bytes>` with NO trailing CRLF
//! 6. Apply the master's command stream with replies suppressed, except
//!    `REPLCONF GETACK *` which is answered with the applied offset
//!
//! Surplus bytes read while consuming the snapshot become the head of
//! the command buffer — the master may pipeline writes right behind the
//! handoff.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use resp_protocol::{encode_command, parse_command, parse_line, FrameError};

use crate::commands::{self, ExecMode};
use crate::session::Session;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("i/o error talking to master: {0}")]
    Io(#[from] std::io::Error),
    #[error("master closed the connection")]
    Disconnected,
    #[error("unexpected reply during {step}: {reply:?}")]
    UnexpectedReply { step: &'static str, reply: String },
    #[error("master sent malformed input: {0}")]
    Protocol(#[from] FrameError),
}

/// Run the link until the master goes away.  Failures are logged, not
/// fatal to the server: the replica keeps serving reads either way.
pub async fn run(state: AppState, host: String, port: u16, listening_port: u16) {
    match master_link(state, &host, port, listening_port).await {
        Ok(()) => info!("master link closed"),
        Err(error) => warn!(%error, "master link failed"),
    }
}

async fn master_link(
    state: AppState,
    host: &str,
    port: u16,
    listening_port: u16,
) -> Result<(), LinkError> {
    let mut stream = TcpStream::connect((host, port)).await?;
    info!(host, port, "connected to master");
    let mut buffer: Vec<u8> = Vec::new();

    stream.write_all(&encode_command(&["PING"])).await?;
    expect_reply(&mut stream, &mut buffer, "PING", "+PONG").await?;

    let own_port = listening_port.to_string();
    stream
        .write_all(&encode_command(&["REPLCONF", "listening-port", &own_port]))
        .await?;
    expect_reply(&mut stream, &mut buffer, "REPLCONF listening-port", "+OK").await?;

    stream
        .write_all(&encode_command(&["REPLCONF", "capa", "psync2"]))
        .await?;
    expect_reply(&mut stream, &mut buffer, "REPLCONF capa", "+OK").await?;

    stream.write_all(&encode_command(&["PSYNC", "?", "-1"])).await?;
    let resync = read_line(&mut stream, &mut buffer).await?;
    if !resync.starts_with("+FULLRESYNC") {
        return Err(LinkError::UnexpectedReply {
            step: "PSYNC",
            reply: resync,
        });
    }

    consume_snapshot(&mut stream, &mut buffer).await?;
    info!("full resync complete, applying master stream");

    apply_stream(state, stream, buffer).await
}

/// Read `$<len>\r\n` and exactly `len` raw snapshot bytes (discarded).
async fn consume_snapshot(
    stream: &mut TcpStream,
    buffer: &mut Vec<u8>,
) -> Result<(), LinkError> {
    let header = read_line(stream, buffer).await?;
    let length = header
        .strip_prefix('$')
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or(LinkError::UnexpectedReply {
            step: "snapshot header",
            reply: header.clone(),
        })?;
    while buffer.len() < length {
        read_more(stream, buffer).await?;
    }
    buffer.drain(..length);
    debug!(length, "snapshot consumed");
    Ok(())
}

/// Steady state: execute every command from the master without replying,
/// track the applied byte offset, and answer GETACK with the offset as
/// it stood before the GETACK itself.
async fn apply_stream(
    state: AppState,
    mut stream: TcpStream,
    mut buffer: Vec<u8>,
) -> Result<(), LinkError> {
    // Synthetic session whose replies go nowhere.
    let (tx, _discard_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(state.clone(), state.next_conn_id(), tx);
    let mut offset: u64 = 0;

    loop {
        while let Some((args, consumed)) = parse_command(&buffer)? {
            buffer.drain(..consumed);
            if !args.is_empty() {
                let name = commands::command_name(&args);
                let is_getack = name == "REPLCONF"
                    && args.get(1).is_some_and(|sub| sub.eq_ignore_ascii_case(b"GETACK"));
                if is_getack {
                    let acked = offset.to_string();
                    stream
                        .write_all(&encode_command(&["REPLCONF", "ACK", &acked]))
                        .await?;
                } else {
                    let _ = commands::execute(&mut session, &args, ExecMode::Normal).await;
                }
            }
            // Every fully-parsed command counts, GETACK included, after
            // the reply-or-no-reply decision.
            offset += consumed as u64;
            state.set_replica_offset(offset);
        }
        if read_more(&mut stream, &mut buffer).await.is_err() {
            return Ok(());
        }
    }
}

async fn read_more(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<(), LinkError> {
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
        return Err(LinkError::Disconnected);
    }
    buffer.extend_from_slice(&chunk[..n]);
    Ok(())
}

async fn read_line(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<String, LinkError> {
    loop {
        if let Some((line, consumed)) = parse_line(buffer) {
            let text = String::from_utf8_lossy(line).into_owned();
            buffer.drain(..consumed);
            return Ok(text);
        }
        read_more(stream, buffer).await?;
    }
}

async fn expect_reply(
    stream: &mut TcpStream,
    buffer: &mut Vec<u8>,
    step: &'static str,
    expected: &str,
) -> Result<(), LinkError> {
    let reply = read_line(stream, buffer).await?;
    if reply != expected {
        return Err(LinkError::UnexpectedReply { step, reply });
    }
    Ok(())
}
