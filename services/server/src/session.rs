//! Per-connection session: the read loop, buffered command parsing, and
//! the transaction / subscribed-mode gates that sit in front of command
//! execution.
//!
//! Each accepted socket splits into a read half driven here and a write
//! half drained by a writer task.  Every byte leaving the connection —
//! replies, pub/sub deliveries, propagated commands — goes through the
//! writer's channel, so frames never interleave mid-write.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

use resp_protocol::{parse_command, Frame, FrameError};

use crate::commands::{self, ExecMode, Reply};
use crate::state::{AppState, OutboundTx};

/// Commands still legal once a connection has subscriptions.
const SUBSCRIBED_MODE_COMMANDS: &[&str] = &[
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "PSUBSCRIBE",
    "PUNSUBSCRIBE",
    "PING",
    "QUIT",
];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("client sent malformed input: {0}")]
    Protocol(#[from] FrameError),
}

pub(crate) struct Session {
    pub(crate) state: AppState,
    pub(crate) conn_id: u64,
    pub(crate) tx: OutboundTx,
    pub(crate) in_transaction: bool,
    pub(crate) queued: Vec<Vec<Vec<u8>>>,
    /// Mirrors the size of this connection's entry in the subscriber
    /// registry; non-zero means subscribed mode.
    pub(crate) channel_count: usize,
    pub(crate) should_close: bool,
}

/// Drive one accepted client connection to completion.
pub async fn handle(state: AppState, stream: TcpStream, peer: SocketAddr) {
    let conn_id = state.next_conn_id();
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write_half, rx));

    let mut session = Session::new(state.clone(), conn_id, tx);
    if let Err(error) = session.read_loop(read_half).await {
        debug!(%peer, %error, "session ended");
    }
    drop(session);

    state.connection_closed(conn_id).await;
    let _ = writer.await;
    debug!(%peer, conn_id, "connection closed");
}

async fn write_loop(mut half: OwnedWriteHalf, mut rx: UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = rx.recv().await {
        if half.write_all(&chunk).await.is_err() {
            break;
        }
    }
}

impl Session {
    pub(crate) fn new(state: AppState, conn_id: u64, tx: OutboundTx) -> Self {
        Session {
            state,
            conn_id,
            tx,
            in_transaction: false,
            queued: Vec::new(),
            channel_count: 0,
            should_close: false,
        }
    }

    async fn read_loop(&mut self, mut read_half: OwnedReadHalf) -> Result<(), SessionError> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; 4096];
        loop {
            while let Some((args, consumed)) = parse_command(&buffer)? {
                buffer.drain(..consumed);
                if args.is_empty() {
                    continue;
                }
                self.dispatch(args).await;
                if self.should_close {
                    return Ok(());
                }
            }
            let n = read_half.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Route one parsed command through the subscribed-mode and
    /// transaction gates, then execute it.
    pub(crate) async fn dispatch(&mut self, args: Vec<Vec<u8>>) {
        let name = commands::command_name(&args);

        if self.channel_count > 0 && !SUBSCRIBED_MODE_COMMANDS.contains(&name.as_str()) {
            self.send_frame(Frame::error(format!(
                "ERR Can't execute '{}' in subscribed mode",
                name.to_ascii_lowercase()
            )));
            return;
        }

        match name.as_str() {
            "MULTI" => self.handle_multi(),
            "EXEC" => self.handle_exec().await,
            "DISCARD" => self.handle_discard(),
            _ if self.in_transaction => {
                self.queued.push(args);
                self.send_frame(Frame::Simple("QUEUED".to_owned()));
            }
            _ => self.execute_client_command(args).await,
        }
    }

    /// Execute outside a transaction.  Write commands on a master hold
    /// the write permit across execution and propagation so replicas see
    /// one global write order.
    async fn execute_client_command(&mut self, args: Vec<Vec<u8>>) {
        let name = commands::command_name(&args);
        if self.state.is_master() && commands::is_write_command(&name) {
            let state = self.state.clone();
            let _permit = state.write_permit().await;
            let reply = commands::execute(self, &args, ExecMode::Normal).await;
            self.send_reply(reply);
            state.propagate(&args).await;
        } else {
            let reply = commands::execute(self, &args, ExecMode::Normal).await;
            self.send_reply(reply);
        }
    }

    fn handle_multi(&mut self) {
        if self.in_transaction {
            self.send_frame(Frame::error("ERR MULTI calls can not be nested"));
            return;
        }
        self.in_transaction = true;
        self.queued.clear();
        self.send_frame(Frame::ok());
    }

    /// Stream `*<n>` then each queued command's reply in order.  The
    /// whole batch runs under one write permit, so its writes reach
    /// replicas contiguously; queued blocking commands run non-blocking.
    async fn handle_exec(&mut self) {
        if !self.in_transaction {
            self.send_frame(Frame::error("ERR EXEC without MULTI"));
            return;
        }
        self.in_transaction = false;
        let queued = std::mem::take(&mut self.queued);

        let state = self.state.clone();
        let _permit = if state.is_master() {
            Some(state.write_permit().await)
        } else {
            None
        };

        self.send_raw(format!("*{}\r\n", queued.len()).into_bytes());
        for args in queued {
            let name = commands::command_name(&args);
            let reply = commands::execute(self, &args, ExecMode::Transaction).await;
            self.send_reply(reply);
            if state.is_master() && commands::is_write_command(&name) {
                state.propagate(&args).await;
            }
        }
    }

    fn handle_discard(&mut self) {
        if !self.in_transaction {
            self.send_frame(Frame::error("ERR DISCARD without MULTI"));
            return;
        }
        self.in_transaction = false;
        self.queued.clear();
        self.send_frame(Frame::ok());
    }

    pub(crate) fn send_frame(&self, frame: Frame) {
        let _ = self.tx.send(frame.to_bytes());
    }

    pub(crate) fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(bytes);
    }

    pub(crate) fn send_reply(&self, reply: Reply) {
        match reply {
            Reply::Frame(frame) => self.send_frame(frame),
            Reply::Raw(bytes) => self.send_raw(bytes),
            Reply::None => {}
        }
    }
}
