use tokio::time::Duration;

use kv_core::stores::{IdSpec, RangeBound};
use kv_core::{StreamEntry, StreamId};
use resp_protocol::Frame;

use super::{parse_u64, wrong_arity, ExecMode, Reply};
use crate::session::Session;

const INVALID_STREAM_ID: &str = "ERR Invalid stream ID specified as stream command argument";

pub(crate) async fn xadd(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 3 || rest[2..].len() % 2 != 0 {
        return wrong_arity("XADD");
    }
    let Some(spec) = std::str::from_utf8(&rest[1]).ok().and_then(IdSpec::parse) else {
        return Frame::error("ERR The ID specified in XADD must be greater than 0-0").into();
    };
    let fields = rest[2..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    match session.state.streams.xadd(&rest[0], spec, fields).await {
        Ok(id) => Frame::bulk(id.to_string().into_bytes()).into(),
        Err(error) => Frame::error(format!("ERR {error}")).into(),
    }
}

pub(crate) async fn xrange(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key, raw_start, raw_end] = rest else {
        return wrong_arity("XRANGE");
    };
    let (Some(start), Some(end)) = (parse_bound(raw_start), parse_bound(raw_end)) else {
        return Frame::error(INVALID_STREAM_ID).into();
    };
    let entries = session.state.streams.xrange(key, start, end).await;
    Frame::Array(entries.iter().map(entry_frame).collect()).into()
}

pub(crate) async fn xread(session: &Session, rest: &[Vec<u8>], mode: ExecMode) -> Reply {
    let mut rest = rest;

    // Optional BLOCK <ms> prefix; 0 blocks forever.
    let mut block: Option<Option<Duration>> = None;
    if rest
        .first()
        .is_some_and(|raw| raw.eq_ignore_ascii_case(b"BLOCK"))
    {
        let Some(ms) = rest.get(1).and_then(|raw| parse_u64(raw)) else {
            return Frame::error("ERR invalid BLOCK value").into();
        };
        block = Some(if ms == 0 {
            None
        } else {
            Some(Duration::from_millis(ms))
        });
        rest = &rest[2..];
    }

    if !rest
        .first()
        .is_some_and(|raw| raw.eq_ignore_ascii_case(b"STREAMS"))
    {
        return Frame::error("ERR syntax error").into();
    }
    let rest = &rest[1..];
    if rest.len() < 2 || rest.len() % 2 != 0 {
        return wrong_arity("XREAD");
    }

    // `$` resolves to the stream's current top id at command start, so a
    // blocking read only sees entries added after it began.
    let count = rest.len() / 2;
    let mut queries = Vec::with_capacity(count);
    for i in 0..count {
        let key = rest[i].clone();
        let after = if rest[i + count].as_slice() == b"$" {
            session.state.streams.last_id(&key).await
        } else {
            match std::str::from_utf8(&rest[i + count]).ok().and_then(StreamId::parse) {
                Some(id) => id,
                None => return Frame::error(INVALID_STREAM_ID).into(),
            }
        };
        queries.push((key, after));
    }

    let block = if mode == ExecMode::Transaction {
        None
    } else {
        block
    };

    match block {
        None => {
            let results = session.state.streams.xread(&queries).await;
            results_frame(&results).into()
        }
        Some(timeout) => {
            let results = tokio::select! {
                results = session.state.streams.xread_block(&queries, timeout) => results,
                () = session.tx.closed() => return Reply::None,
            };
            match results {
                Some(results) => results_frame(&results).into(),
                None => Frame::NullArray.into(),
            }
        }
    }
}

fn parse_bound(raw: &[u8]) -> Option<RangeBound> {
    match raw {
        b"-" => Some(RangeBound::Min),
        b"+" => Some(RangeBound::Max),
        _ => std::str::from_utf8(raw)
            .ok()
            .and_then(StreamId::parse)
            .map(RangeBound::Id),
    }
}

fn results_frame(results: &[(Vec<u8>, Vec<StreamEntry>)]) -> Frame {
    Frame::Array(
        results
            .iter()
            .map(|(key, entries)| {
                Frame::Array(vec![
                    Frame::bulk(key.clone()),
                    Frame::Array(entries.iter().map(entry_frame).collect()),
                ])
            })
            .collect(),
    )
}

fn entry_frame(entry: &StreamEntry) -> Frame {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (field, value) in &entry.fields {
        fields.push(Frame::bulk(field.clone()));
        fields.push(Frame::bulk(value.clone()));
    }
    Frame::Array(vec![
        Frame::bulk(entry.id.to_string().into_bytes()),
        Frame::Array(fields),
    ])
}
