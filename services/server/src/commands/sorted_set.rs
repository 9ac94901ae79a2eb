use resp_protocol::Frame;

use super::{format_float, parse_f64, parse_i64, wrong_arity, Reply};
use crate::session::Session;

pub(crate) async fn zadd(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 3 || rest[1..].len() % 2 != 0 {
        return wrong_arity("ZADD");
    }
    // All scores must parse before anything is applied.
    let mut pairs = Vec::with_capacity(rest[1..].len() / 2);
    for pair in rest[1..].chunks_exact(2) {
        let Some(score) = parse_f64(&pair[0]) else {
            return Frame::error("ERR value is not a valid float").into();
        };
        pairs.push((score, pair[1].clone()));
    }
    let added = session.state.sorted_sets.zadd(&rest[0], pairs).await;
    Frame::Integer(i64::try_from(added).unwrap_or(i64::MAX)).into()
}

pub(crate) async fn zrank(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key, member] = rest else {
        return wrong_arity("ZRANK");
    };
    match session.state.sorted_sets.zrank(key, member).await {
        Some(rank) => Frame::Integer(i64::try_from(rank).unwrap_or(i64::MAX)).into(),
        None => Frame::NullBulk.into(),
    }
}

pub(crate) async fn zrange(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key, start, end] = rest else {
        return wrong_arity("ZRANGE");
    };
    let (Some(start), Some(end)) = (parse_i64(start), parse_i64(end)) else {
        return Frame::error("ERR value is not an integer or out of range").into();
    };
    let members = session.state.sorted_sets.zrange(key, start, end).await;
    Frame::Array(members.into_iter().map(Frame::Bulk).collect()).into()
}

pub(crate) async fn zcard(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key] = rest else {
        return wrong_arity("ZCARD");
    };
    let cardinality = session.state.sorted_sets.zcard(key).await;
    Frame::Integer(i64::try_from(cardinality).unwrap_or(i64::MAX)).into()
}

pub(crate) async fn zscore(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key, member] = rest else {
        return wrong_arity("ZSCORE");
    };
    match session.state.sorted_sets.zscore(key, member).await {
        Some(score) => Frame::bulk(format_float(score).into_bytes()).into(),
        None => Frame::NullBulk.into(),
    }
}

pub(crate) async fn zrem(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key, member] = rest else {
        return wrong_arity("ZREM");
    };
    let removed = session.state.sorted_sets.zrem(key, member).await;
    Frame::Integer(i64::from(removed)).into()
}
