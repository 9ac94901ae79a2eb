//! End-to-end protocol basics: liveness commands, error replies, QUIT,
//! and pipelined input.

mod common;

use common::{connect, expect_bytes, read_available, roundtrip, start_master};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn ping_replies_pong() {
    let addr = start_master().await;
    let mut client = connect(addr).await;
    roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;
}

#[tokio::test]
async fn echo_replies_with_the_message() {
    let addr = start_master().await;
    let mut client = connect(addr).await;
    roundtrip(&mut client, &["ECHO", "hello"], b"$5\r\nhello\r\n").await;
}

#[tokio::test]
async fn unknown_command_is_an_error_and_keeps_the_connection() {
    let addr = start_master().await;
    let mut client = connect(addr).await;
    roundtrip(&mut client, &["NOSUCH"], b"-ERR unknown command\r\n").await;
    // Still usable afterwards.
    roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;
}

#[tokio::test]
async fn wrong_arity_names_the_command() {
    let addr = start_master().await;
    let mut client = connect(addr).await;
    roundtrip(
        &mut client,
        &["ECHO", "a", "b"],
        b"-ERR wrong number of arguments for 'ECHO' command\r\n",
    )
    .await;
    roundtrip(
        &mut client,
        &["GET"],
        b"-ERR wrong number of arguments for 'GET' command\r\n",
    )
    .await;
}

#[tokio::test]
async fn quit_acknowledges_and_closes() {
    let addr = start_master().await;
    let mut client = connect(addr).await;
    roundtrip(&mut client, &["QUIT"], b"+OK\r\n").await;
    // The server side closes; the next read observes EOF.
    let rest = read_available(&mut client, Duration::from_millis(500)).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    let mut wire = resp_protocol::encode_command(&["SET", "k", "v"]);
    wire.extend_from_slice(&resp_protocol::encode_command(&["GET", "k"]));
    wire.extend_from_slice(&resp_protocol::encode_command(&["PING"]));
    client.write_all(&wire).await.unwrap();

    expect_bytes(&mut client, b"+OK\r\n$1\r\nv\r\n+PONG\r\n").await;
}

#[tokio::test]
async fn subscribe_switches_ping_to_message_shape() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;
    roundtrip(
        &mut client,
        &["SUBSCRIBE", "ch"],
        b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n",
    )
    .await;
    roundtrip(&mut client, &["PING"], b"*2\r\n$4\r\npong\r\n$0\r\n\r\n").await;
}

#[tokio::test]
async fn malformed_input_closes_the_connection() {
    let addr = start_master().await;
    let mut client = connect(addr).await;
    // The server may have closed already by the time the PING goes out,
    // so neither write is allowed to panic.
    let _ = client.write_all(b":not-a-command\r\n").await;
    let _ = client
        .write_all(&resp_protocol::encode_command(&["PING"]))
        .await;
    let rest = read_available(&mut client, Duration::from_millis(500)).await;
    assert!(rest.is_empty(), "expected EOF, got {rest:?}");
}
