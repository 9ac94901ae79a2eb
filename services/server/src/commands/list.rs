use tokio::time::Duration;

use resp_protocol::Frame;

use super::{parse_f64, parse_i64, wrong_arity, ExecMode, Reply};
use crate::session::Session;

const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

pub(crate) async fn rpush(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 2 {
        return wrong_arity("RPUSH");
    }
    let len = session
        .state
        .lists
        .rpush(&rest[0], rest[1..].to_vec())
        .await;
    integer(len)
}

pub(crate) async fn lpush(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 2 {
        return wrong_arity("LPUSH");
    }
    let len = session
        .state
        .lists
        .lpush(&rest[0], rest[1..].to_vec())
        .await;
    integer(len)
}

pub(crate) async fn lrange(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key, start, end] = rest else {
        return wrong_arity("LRANGE");
    };
    let (Some(start), Some(end)) = (parse_i64(start), parse_i64(end)) else {
        return Frame::error(NOT_AN_INTEGER).into();
    };
    let items = session.state.lists.lrange(key, start, end).await;
    Frame::Array(items.into_iter().map(Frame::Bulk).collect()).into()
}

pub(crate) async fn llen(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key] = rest else {
        return wrong_arity("LLEN");
    };
    integer(session.state.lists.llen(key).await)
}

/// Count-less LPOP replies with a single bulk; an explicit count always
/// gets an array, even for one element.
pub(crate) async fn lpop(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let (key, count) = match rest {
        [key] => (key, None),
        [key, raw_count] => match parse_i64(raw_count) {
            Some(n) if n >= 0 => (key, Some(usize::try_from(n).unwrap_or(usize::MAX))),
            _ => return Frame::error(NOT_AN_INTEGER).into(),
        },
        _ => return wrong_arity("LPOP"),
    };
    let popped = session.state.lists.lpop(key, count.unwrap_or(1)).await;
    if popped.is_empty() {
        return Frame::NullBulk.into();
    }
    match count {
        None => Frame::Bulk(popped.into_iter().next().expect("non-empty")).into(),
        Some(_) => Frame::Array(popped.into_iter().map(Frame::Bulk).collect()).into(),
    }
}

pub(crate) async fn blpop(session: &Session, rest: &[Vec<u8>], mode: ExecMode) -> Reply {
    let [key, raw_timeout] = rest else {
        return wrong_arity("BLPOP");
    };
    let timeout = match parse_f64(raw_timeout) {
        Some(seconds) if seconds >= 0.0 => {
            if seconds == 0.0 {
                None
            } else {
                Some(Duration::from_secs_f64(seconds))
            }
        }
        _ => return Frame::error("ERR timeout is not a float or out of range").into(),
    };

    // Inside EXEC the pop must not stall the batch.
    if mode == ExecMode::Transaction {
        return match session.state.lists.lpop(key, 1).await.into_iter().next() {
            Some(value) => popped_pair(key, value),
            None => Frame::NullArray.into(),
        };
    }

    let popped = tokio::select! {
        popped = session.state.lists.blpop(key, timeout) => popped,
        // The peer hung up; stop waiting, nobody reads the reply.
        () = session.tx.closed() => return Reply::None,
    };
    match popped {
        Some(value) => popped_pair(key, value),
        None => Frame::NullArray.into(),
    }
}

fn popped_pair(key: &[u8], value: Vec<u8>) -> Reply {
    Frame::Array(vec![Frame::bulk(key), Frame::Bulk(value)]).into()
}

fn integer(len: usize) -> Reply {
    Frame::Integer(i64::try_from(len).unwrap_or(i64::MAX)).into()
}
