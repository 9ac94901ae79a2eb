//! Commands that cut across the stores: liveness, introspection, key
//! deletion, and the administrative read-outs.

use resp_protocol::Frame;

use super::{wrong_arity, Reply};
use crate::session::Session;

pub(crate) fn ping(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if !rest.is_empty() {
        return wrong_arity("PING");
    }
    if session.channel_count > 0 {
        // Subscribed-mode ping replies in message shape.
        return Frame::Array(vec![Frame::bulk(&b"pong"[..]), Frame::bulk(Vec::new())]).into();
    }
    Frame::Simple("PONG".to_owned()).into()
}

pub(crate) fn echo(rest: &[Vec<u8>]) -> Reply {
    match rest {
        [message] => Frame::bulk(message.clone()).into(),
        _ => wrong_arity("ECHO"),
    }
}

pub(crate) async fn type_of(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key] = rest else {
        return wrong_arity("TYPE");
    };
    let state = &session.state;
    let name = if state.strings.contains(key).await {
        "string"
    } else if state.lists.exists(key).await {
        "list"
    } else if state.streams.exists(key).await {
        "stream"
    } else if state.sorted_sets.exists(key).await {
        "zset"
    } else {
        "none"
    };
    Frame::Simple(name.to_owned()).into()
}

/// Only `*` matches anything, and only string keys are reported.
pub(crate) async fn keys(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [pattern] = rest else {
        return wrong_arity("KEYS");
    };
    if pattern.as_slice() != b"*" {
        return Frame::Array(Vec::new()).into();
    }
    let keys = session.state.strings.keys().await;
    Frame::Array(keys.into_iter().map(Frame::Bulk).collect()).into()
}

pub(crate) fn config_get(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 2 || !rest[0].eq_ignore_ascii_case(b"GET") {
        return Frame::error("ERR syntax error").into();
    }
    let config = &session.state.config;
    let value = match rest[1].as_slice() {
        b"dir" => config.dir.clone(),
        b"dbfilename" => config.dbfilename.clone(),
        _ => return Frame::error("ERR unknown CONFIG GET parameter").into(),
    };
    Frame::Array(vec![
        Frame::bulk(rest[1].clone()),
        Frame::bulk(value.unwrap_or_default().into_bytes()),
    ])
    .into()
}

pub(crate) async fn info(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let section = rest.first().map(|raw| raw.to_ascii_uppercase());
    if section.as_deref() != Some(b"REPLICATION") {
        return Frame::error("ERR unsupported INFO section").into();
    }
    let state = &session.state;
    let role = if state.is_master() { "master" } else { "slave" };
    let body = format!(
        "role:{role}\r\nmaster_replid:{}\r\nmaster_repl_offset:{}\r\n",
        state.replid,
        state.master_repl_offset().await
    );
    Frame::bulk(body.into_bytes()).into()
}

pub(crate) fn quit(session: &mut Session) -> Reply {
    let subscribed = session.channel_count > 0;
    session.should_close = true;
    if subscribed {
        Reply::None
    } else {
        Frame::ok().into()
    }
}

/// Remove each key from whichever stores hold it; counts keys that
/// existed anywhere.
pub(crate) async fn del(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.is_empty() {
        return wrong_arity("DEL");
    }
    let state = &session.state;
    let mut removed: i64 = 0;
    for key in rest {
        let in_strings = state.strings.remove(key).await;
        let in_lists = state.lists.remove(key).await;
        let in_streams = state.streams.remove(key).await;
        let in_zsets = state.sorted_sets.remove(key).await;
        if in_strings || in_lists || in_streams || in_zsets {
            removed += 1;
        }
    }
    Frame::Integer(removed).into()
}
