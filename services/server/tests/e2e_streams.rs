//! End-to-end stream-store behavior: XADD id rules, XRANGE, and XREAD
//! with and without BLOCK.

mod common;

use common::{connect, roundtrip, start_master};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn xadd_rejects_non_increasing_ids() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["XADD", "s", "1-1", "k", "v"], b"$3\r\n1-1\r\n").await;
    roundtrip(
        &mut client,
        &["XADD", "s", "1-1", "k", "v"],
        b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n",
    )
    .await;
    roundtrip(
        &mut client,
        &["XADD", "s", "0-0", "k", "v"],
        b"-ERR The ID specified in XADD must be greater than 0-0\r\n",
    )
    .await;
}

#[tokio::test]
async fn xadd_generates_sequences() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["XADD", "s", "5-*", "k", "v"], b"$3\r\n5-0\r\n").await;
    roundtrip(&mut client, &["XADD", "s", "5-*", "k", "v"], b"$3\r\n5-1\r\n").await;
    roundtrip(&mut client, &["XADD", "s", "6-*", "k", "v"], b"$3\r\n6-0\r\n").await;
    // A fresh stream at millisecond zero starts at sequence one.
    roundtrip(&mut client, &["XADD", "t", "0-*", "k", "v"], b"$3\r\n0-1\r\n").await;
}

#[tokio::test]
async fn xrange_is_inclusive_and_supports_min_max() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["XADD", "s", "1-1", "a", "1"], b"$3\r\n1-1\r\n").await;
    roundtrip(&mut client, &["XADD", "s", "2-0", "b", "2"], b"$3\r\n2-0\r\n").await;

    roundtrip(
        &mut client,
        &["XRANGE", "s", "-", "+"],
        b"*2\r\n\
          *2\r\n$3\r\n1-1\r\n*2\r\n$1\r\na\r\n$1\r\n1\r\n\
          *2\r\n$3\r\n2-0\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n",
    )
    .await;
    roundtrip(
        &mut client,
        &["XRANGE", "s", "2-0", "2-0"],
        b"*1\r\n*2\r\n$3\r\n2-0\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n",
    )
    .await;
    roundtrip(
        &mut client,
        &["XRANGE", "s", "nope", "+"],
        b"-ERR Invalid stream ID specified as stream command argument\r\n",
    )
    .await;
}

#[tokio::test]
async fn xread_returns_strictly_newer_entries() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    roundtrip(&mut client, &["XADD", "s", "1-1", "k", "v"], b"$3\r\n1-1\r\n").await;

    roundtrip(
        &mut client,
        &["XREAD", "STREAMS", "s", "0-0"],
        b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nk\r\n$1\r\nv\r\n",
    )
    .await;
    // Nothing newer than the top entry, no BLOCK: empty array.
    roundtrip(&mut client, &["XREAD", "STREAMS", "s", "1-1"], b"*0\r\n").await;
}

#[tokio::test]
async fn xread_block_wakes_on_new_entries() {
    let addr = start_master().await;
    let mut reader = connect(addr).await;
    let mut writer = connect(addr).await;

    // `$` resolves to the current top id, so only the upcoming entry
    // matches.
    common::send(&mut reader, &["XREAD", "BLOCK", "0", "STREAMS", "s", "$"]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    roundtrip(&mut writer, &["XADD", "s", "7-1", "k", "v"], b"$3\r\n7-1\r\n").await;

    timeout(
        Duration::from_secs(1),
        common::expect_bytes(
            &mut reader,
            b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n7-1\r\n*2\r\n$1\r\nk\r\n$1\r\nv\r\n",
        ),
    )
    .await
    .expect("blocked reader should wake promptly");
}

#[tokio::test]
async fn xread_block_times_out_with_a_null_array() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    common::send(&mut client, &["XREAD", "BLOCK", "100", "STREAMS", "s", "$"]).await;
    timeout(
        Duration::from_secs(1),
        common::expect_bytes(&mut client, b"*-1\r\n"),
    )
    .await
    .expect("timeout reply should arrive");
}

#[tokio::test]
async fn xread_argument_errors() {
    let addr = start_master().await;
    let mut client = connect(addr).await;

    roundtrip(
        &mut client,
        &["XREAD", "BLOCK", "soon", "STREAMS", "s", "0-0"],
        b"-ERR invalid BLOCK value\r\n",
    )
    .await;
    roundtrip(&mut client, &["XREAD", "s", "0-0"], b"-ERR syntax error\r\n").await;
    roundtrip(
        &mut client,
        &["XREAD", "STREAMS", "s"],
        b"-ERR wrong number of arguments for 'XREAD' command\r\n",
    )
    .await;
}
