//! Shared harness for the end-to-end suites: an in-process server bound
//! to port 0, plus raw-RESP client helpers over `TcpStream`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use server::{Server, ServerConfig};

pub fn master_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        replica_of: None,
        dir: None,
        dbfilename: None,
    }
}

/// Start a server in-process and return the address it accepted on.
pub async fn start_server(config: ServerConfig) -> SocketAddr {
    let server = Server::bind(config).await.expect("failed to bind server");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(server.serve());
    addr
}

pub async fn start_master() -> SocketAddr {
    start_server(master_config()).await
}

pub async fn start_replica_of(master: SocketAddr) -> SocketAddr {
    start_server(ServerConfig {
        port: 0,
        replica_of: Some(("127.0.0.1".to_owned(), master.port())),
        dir: None,
        dbfilename: None,
    })
    .await
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect")
}

pub async fn send(stream: &mut TcpStream, args: &[&str]) {
    stream
        .write_all(&resp_protocol::encode_command(args))
        .await
        .expect("send command");
}

/// Read exactly `expected.len()` bytes and assert they match.
pub async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut actual = vec![0u8; expected.len()];
    timeout(Duration::from_secs(2), stream.read_exact(&mut actual))
        .await
        .expect("timed out waiting for reply")
        .expect("read reply");
    assert_eq!(
        actual,
        expected,
        "expected {:?}, got {:?}",
        String::from_utf8_lossy(expected),
        String::from_utf8_lossy(&actual)
    );
}

/// Send a command and assert the exact reply bytes.
pub async fn roundtrip(stream: &mut TcpStream, args: &[&str], expected: &[u8]) {
    send(stream, args).await;
    expect_bytes(stream, expected).await;
}

/// Drain whatever arrives within `window` of silence.
pub async fn read_available(stream: &mut TcpStream, window: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match timeout(window, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
        }
    }
    out
}

/// Read one CRLF-terminated line (handshake replies).
pub async fn read_line(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        timeout(Duration::from_secs(2), stream.read_exact(&mut byte))
            .await
            .expect("timed out reading line")
            .expect("read");
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return String::from_utf8_lossy(&line).into_owned();
        }
    }
}

/// Read exactly `n` bytes.
pub async fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out reading payload")
        .expect("read");
    buf
}
