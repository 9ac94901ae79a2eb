use resp_protocol::Frame;

use super::{wrong_arity, Reply};
use crate::session::Session;

pub(crate) async fn subscribe(session: &mut Session, rest: &[Vec<u8>]) -> Reply {
    let [channel] = rest else {
        return wrong_arity("SUBSCRIBE");
    };
    let count = session
        .state
        .subscribe(session.conn_id, channel.clone(), &session.tx)
        .await;
    session.channel_count = count;
    Frame::Array(vec![
        Frame::bulk(&b"subscribe"[..]),
        Frame::bulk(channel.clone()),
        Frame::Integer(i64::try_from(count).unwrap_or(i64::MAX)),
    ])
    .into()
}

pub(crate) async fn unsubscribe(session: &mut Session, rest: &[Vec<u8>]) -> Reply {
    let [channel] = rest else {
        return wrong_arity("UNSUBSCRIBE");
    };
    let count = session.state.unsubscribe(session.conn_id, channel).await;
    session.channel_count = count;
    Frame::Array(vec![
        Frame::bulk(&b"unsubscribe"[..]),
        Frame::bulk(channel.clone()),
        Frame::Integer(i64::try_from(count).unwrap_or(i64::MAX)),
    ])
    .into()
}

pub(crate) async fn publish(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [channel, message] = rest else {
        return wrong_arity("PUBLISH");
    };
    let delivered = session.state.publish(channel, message).await;
    Frame::Integer(i64::try_from(delivered).unwrap_or(i64::MAX)).into()
}

/// Pattern subscriptions are accepted in subscribed mode but not
/// implemented.
pub(crate) fn unsupported_pattern(name: &str) -> Reply {
    Frame::error(format!("ERR {name} is not supported")).into()
}
