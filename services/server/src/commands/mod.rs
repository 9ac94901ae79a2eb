//! Command dispatch: one handler per command, grouped by the store they
//! operate on.  Handlers return a [`Reply`]; the session decides where
//! the bytes go (and the master-link apply path discards them).

pub(crate) mod general;
pub(crate) mod geo;
pub(crate) mod list;
pub(crate) mod pubsub;
pub(crate) mod replication;
pub(crate) mod sorted_set;
pub(crate) mod stream;
pub(crate) mod string;

use resp_protocol::Frame;

use crate::session::Session;

/// Commands the master re-serializes to its replicas after execution.
const WRITE_COMMANDS: &[&str] = &[
    "SET", "DEL", "INCR", "DECR", "RPUSH", "LPUSH", "LPOP", "XADD", "ZADD",
];

/// What a handler produced for the connection.
pub(crate) enum Reply {
    Frame(Frame),
    /// Pre-rendered bytes (PSYNC's snapshot handoff, REPLCONF ACK).
    Raw(Vec<u8>),
    None,
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        Reply::Frame(frame)
    }
}

/// Whether the command runs standalone or inside an EXEC batch (where
/// blocking commands must not block).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecMode {
    Normal,
    Transaction,
}

pub(crate) fn command_name(args: &[Vec<u8>]) -> String {
    args.first()
        .map(|raw| String::from_utf8_lossy(raw).to_ascii_uppercase())
        .unwrap_or_default()
}

pub(crate) fn is_write_command(name: &str) -> bool {
    WRITE_COMMANDS.contains(&name)
}

pub(crate) fn wrong_arity(name: &str) -> Reply {
    Frame::error(format!(
        "ERR wrong number of arguments for '{name}' command"
    ))
    .into()
}

pub(crate) fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

pub(crate) fn parse_u64(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

pub(crate) fn parse_f64(raw: &[u8]) -> Option<f64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Canonical float rendering for scores, positions, and distances:
/// shortest round-trip decimal, no trailing zeros, no scientific
/// notation in the score range.
pub(crate) fn format_float(value: f64) -> String {
    format!("{value}")
}

pub(crate) async fn execute(session: &mut Session, args: &[Vec<u8>], mode: ExecMode) -> Reply {
    let name = command_name(args);
    let rest = &args[1..];
    match name.as_str() {
        "PING" => general::ping(session, rest),
        "ECHO" => general::echo(rest),
        "TYPE" => general::type_of(session, rest).await,
        "KEYS" => general::keys(session, rest).await,
        "CONFIG" => general::config_get(session, rest),
        "INFO" => general::info(session, rest).await,
        "QUIT" => general::quit(session),
        "DEL" => general::del(session, rest).await,
        "SET" => string::set(session, rest).await,
        "GET" => string::get(session, rest).await,
        "INCR" => string::incr(session, rest).await,
        "DECR" => string::decr(session, rest).await,
        "RPUSH" => list::rpush(session, rest).await,
        "LPUSH" => list::lpush(session, rest).await,
        "LRANGE" => list::lrange(session, rest).await,
        "LLEN" => list::llen(session, rest).await,
        "LPOP" => list::lpop(session, rest).await,
        "BLPOP" => list::blpop(session, rest, mode).await,
        "XADD" => stream::xadd(session, rest).await,
        "XRANGE" => stream::xrange(session, rest).await,
        "XREAD" => stream::xread(session, rest, mode).await,
        "ZADD" => sorted_set::zadd(session, rest).await,
        "ZRANK" => sorted_set::zrank(session, rest).await,
        "ZRANGE" => sorted_set::zrange(session, rest).await,
        "ZCARD" => sorted_set::zcard(session, rest).await,
        "ZSCORE" => sorted_set::zscore(session, rest).await,
        "ZREM" => sorted_set::zrem(session, rest).await,
        "GEOADD" => geo::geoadd(session, rest).await,
        "GEOPOS" => geo::geopos(session, rest).await,
        "GEODIST" => geo::geodist(session, rest).await,
        "GEOSEARCH" => geo::geosearch(session, rest).await,
        "SUBSCRIBE" => pubsub::subscribe(session, rest).await,
        "UNSUBSCRIBE" => pubsub::unsubscribe(session, rest).await,
        "PSUBSCRIBE" | "PUNSUBSCRIBE" => pubsub::unsupported_pattern(&name),
        "PUBLISH" => pubsub::publish(session, rest).await,
        "REPLCONF" => replication::replconf(session, rest).await,
        "PSYNC" => replication::psync(session, rest).await,
        "WAIT" => replication::wait(session, rest).await,
        _ => Frame::error("ERR unknown command").into(),
    }
}
