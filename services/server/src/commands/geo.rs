//! Geo commands: positions are geohash-encoded into sorted-set scores,
//! so GEO* and Z* operations share a keyspace.

use kv_core::geo::{self, Unit};
use resp_protocol::Frame;

use super::{format_float, parse_f64, wrong_arity, Reply};
use crate::session::Session;

pub(crate) async fn geoadd(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 4 || rest[1..].len() % 3 != 0 {
        return wrong_arity("GEOADD");
    }
    let mut added = 0;
    for triple in rest[1..].chunks_exact(3) {
        let member = &triple[2];
        let (Some(longitude), Some(latitude)) = (parse_f64(&triple[0]), parse_f64(&triple[1]))
        else {
            return invalid_pair(member);
        };
        if !geo::in_bounds(longitude, latitude) {
            return invalid_pair(member);
        }
        #[allow(clippy::cast_precision_loss)]
        let score = geo::encode(longitude, latitude) as f64;
        added += session
            .state
            .sorted_sets
            .zadd(&rest[0], vec![(score, member.clone())])
            .await;
    }
    Frame::Integer(i64::try_from(added).unwrap_or(i64::MAX)).into()
}

fn invalid_pair(member: &[u8]) -> Reply {
    Frame::error(format!(
        "ERR invalid longitude, latitude pair for '{}'",
        String::from_utf8_lossy(member)
    ))
    .into()
}

pub(crate) async fn geopos(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 2 {
        return wrong_arity("GEOPOS");
    }
    let mut positions = Vec::with_capacity(rest.len() - 1);
    for member in &rest[1..] {
        match session.state.sorted_sets.zscore(&rest[0], member).await {
            None => positions.push(Frame::NullArray),
            Some(score) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let (longitude, latitude) = geo::decode(score as u64);
                positions.push(Frame::Array(vec![
                    Frame::bulk(format_float(longitude).into_bytes()),
                    Frame::bulk(format_float(latitude).into_bytes()),
                ]));
            }
        }
    }
    Frame::Array(positions).into()
}

pub(crate) async fn geodist(session: &Session, rest: &[Vec<u8>]) -> Reply {
    let [key, from, to] = rest else {
        return wrong_arity("GEODIST");
    };
    let zsets = &session.state.sorted_sets;
    let (Some(score1), Some(score2)) = (zsets.zscore(key, from).await, zsets.zscore(key, to).await)
    else {
        return Frame::NullBulk.into();
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lon1, lat1) = geo::decode(score1 as u64);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lon2, lat2) = geo::decode(score2 as u64);
    let distance = geo::haversine(lon1, lat1, lon2, lat2);
    Frame::bulk(format_float(distance).into_bytes()).into()
}

pub(crate) async fn geosearch(session: &Session, rest: &[Vec<u8>]) -> Reply {
    if rest.len() < 7
        || !rest[1].eq_ignore_ascii_case(b"FROMLONLAT")
        || !rest[4].eq_ignore_ascii_case(b"BYRADIUS")
    {
        return Frame::error("ERR syntax error").into();
    }
    let (Some(longitude), Some(latitude), Some(radius)) = (
        parse_f64(&rest[2]),
        parse_f64(&rest[3]),
        parse_f64(&rest[5]),
    ) else {
        return Frame::error("ERR invalid number formats").into();
    };
    let Some(unit) = Unit::parse(&rest[6]) else {
        return Frame::error("ERR unsupported unit provided. please use M, KM, FT, MI").into();
    };
    let members = session
        .state
        .sorted_sets
        .geosearch(&rest[0], longitude, latitude, unit.to_meters(radius))
        .await;
    Frame::Array(members.into_iter().map(Frame::Bulk).collect()).into()
}
