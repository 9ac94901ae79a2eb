use resp_protocol::Frame;

use super::{parse_u64, wrong_arity, Reply};
use crate::session::Session;

const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

pub(crate) async fn set(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 2 {
        return wrong_arity("SET");
    }
    let mut expire_ms = None;
    if rest.len() > 2 {
        if rest.len() >= 4 && rest[2].eq_ignore_ascii_case(b"PX") {
            match parse_u64(&rest[3]) {
                Some(ms) => expire_ms = Some(ms),
                None => return Frame::error(NOT_AN_INTEGER).into(),
            }
        } else {
            return Frame::error("ERR syntax error").into();
        }
    }
    session
        .state
        .strings
        .set(rest[0].clone(), rest[1].clone(), expire_ms)
        .await;
    Frame::ok().into()
}

pub(crate) async fn get(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key] = rest else {
        return wrong_arity("GET");
    };
    match session.state.strings.get(key).await {
        Some(value) => Frame::Bulk(value).into(),
        None => Frame::NullBulk.into(),
    }
}

pub(crate) async fn incr(session: &Session, rest: &[Vec<u8>]) -> Reply {
    adjust(session, rest, 1, "INCR").await
}

pub(crate) async fn decr(session: &Session, rest: &[Vec<u8>]) -> Reply {
    adjust(session, rest, -1, "DECR").await
}

async fn adjust(session: &Session, rest: &[Vec<u8>], delta: i64, name: &str) -> Reply {
    let [key] = rest else {
        return wrong_arity(name);
    };
    match session.state.strings.incr_by(key, delta).await {
        Ok(value) => Frame::Integer(value).into(),
        Err(_) => Frame::error(NOT_AN_INTEGER).into(),
    }
}
