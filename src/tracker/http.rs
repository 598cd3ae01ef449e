//! HTTP tracker codec (BEP-3): builds the GET query string and parses the
//! bencoded reply body.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Deserialize;

use super::{AnnounceParams, AnnounceResult, Peer, ScrapeResult, TrackerError, TrackerResult};

/// Builds the query-string parameters for an HTTP announce request, per
/// BEP-3. `compact=1` is always sent; this client has no use for the
/// non-compact peer list on the way out, only on the way in.
pub fn announce_query(params: &AnnounceParams) -> Vec<(String, String)> {
    let mut query = vec![
        ("info_hash".to_string(), url_encode(&params.info_hash)),
        ("peer_id".to_string(), url_encode(&params.peer_id)),
        ("port".to_string(), params.port.to_string()),
        ("uploaded".to_string(), params.uploaded.to_string()),
        ("downloaded".to_string(), params.downloaded.to_string()),
        ("left".to_string(), params.left.to_string()),
        ("compact".to_string(), "1".to_string()),
    ];
    if params.numwant >= 0 {
        query.push(("numwant".to_string(), params.numwant.to_string()));
    }
    if let Some(event) = params.event.as_http_str() {
        query.push(("event".to_string(), event.to_string()));
    }
    query
}

#[derive(Debug, Deserialize)]
struct RawAnnounceResponse {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(default, rename = "min interval")]
    min_interval: Option<i64>,
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    complete: i64,
    #[serde(default)]
    incomplete: i64,
    #[serde(default)]
    peers: RawPeers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPeers {
    Compact(#[serde(with = "serde_bytes")] Vec<u8>),
    Dict(Vec<RawPeerDict>),
}

impl Default for RawPeers {
    fn default() -> Self {
        RawPeers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RawPeerDict {
    ip: String,
    port: u16,
}

/// Parses an HTTP tracker announce reply, handling both the compact
/// (6-byte-per-peer IPv4, or 18-byte-per-peer IPv6) and dictionary peer
/// list forms.
pub fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResult> {
    let raw: RawAnnounceResponse = serde_bencode::from_bytes(bytes)?;
    if let Some(reason) = raw.failure_reason {
        return Err(TrackerError::Failure(reason));
    }

    let peers = match raw.peers {
        RawPeers::Compact(bytes) => parse_compact_peers(&bytes)?,
        RawPeers::Dict(dicts) => dicts
            .into_iter()
            .filter_map(|d| d.ip.parse::<IpAddr>().ok().map(|ip| Peer { ip, port: d.port }))
            .collect(),
    };

    // `interval` is the primary re-announce period; `min interval`, when the
    // tracker sends one, only ever floors it — never shortens it.
    Ok(AnnounceResult {
        interval: raw.interval.max(raw.min_interval.unwrap_or(0)),
        seeders: raw.complete,
        leechers: raw.incomplete,
        peers,
    })
}

/// Decodes the compact peer string: a flat run of 6-byte IPv4 entries
/// (4-byte address, 2-byte port). BEP-3 compact is IPv4-only; this client
/// doesn't parse an IPv6 variant, so any length not a multiple of 6 is
/// malformed.
fn parse_compact_peers(bytes: &[u8]) -> TrackerResult<Vec<Peer>> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::Malformed("compact peers length not a multiple of 6"));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            Peer { ip: IpAddr::V4(ip), port }
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct RawScrapeFile {
    complete: i64,
    incomplete: i64,
    downloaded: i64,
}

#[derive(Debug, Deserialize)]
struct RawScrapeResponse {
    files: std::collections::HashMap<serde_bytes::ByteBuf, RawScrapeFile>,
}

/// Parses an HTTP scrape reply for a single info-hash (the `files`
/// dictionary always has exactly one entry for a single-torrent scrape).
pub fn parse_scrape_response(bytes: &[u8], info_hash: &[u8; 20]) -> TrackerResult<ScrapeResult> {
    let raw: RawScrapeResponse = serde_bencode::from_bytes(bytes)?;
    let file = raw
        .files
        .get(info_hash.as_slice())
        .ok_or(TrackerError::Malformed("scrape response missing this torrent's info-hash"))?;
    Ok(ScrapeResult {
        seeders: file.complete,
        completed: file.downloaded,
        leechers: file.incomplete,
    })
}

/// Percent-encodes raw bytes per RFC 3986, leaving the unreserved set
/// (`A-Za-z0-9-._~`) untouched. `info_hash` and `peer_id` are raw 20-byte
/// strings, not valid UTF-8 in general, so this can't use a
/// string-oriented encoder.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encode_leaves_unreserved_bytes_alone() {
        assert_eq!(url_encode(b"abc-._~XYZ019"), "abc-._~XYZ019");
    }

    #[test]
    fn url_encode_percent_encodes_everything_else() {
        assert_eq!(url_encode(&[0xff, 0x20, b'%']), "%FF%20%25");
    }

    #[test]
    fn parse_compact_peers_splits_six_byte_groups() {
        let bytes = [127, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 1, 0x1a, 0xe2];
        let peers = parse_compact_peers(&bytes).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(peers[0].port, 0x1ae1);
    }

    #[test]
    fn parse_compact_peers_rejects_misaligned_length() {
        assert!(parse_compact_peers(&[1, 2, 3]).is_err());
    }

    #[test]
    fn announce_query_includes_event_only_when_set() {
        let params = AnnounceParams {
            info_hash: [1u8; 20],
            peer_id: [2u8; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 100,
            event: super::super::AnnounceEvent::None,
            numwant: -1,
        };
        let query = announce_query(&params);
        assert!(!query.iter().any(|(k, _)| k == "event"));
        assert!(!query.iter().any(|(k, _)| k == "numwant"));
    }

    #[test]
    fn interval_is_floored_by_min_interval_not_replaced_by_it() {
        let bencoded = b"d8:intervali1800e12:min intervali900e8:completei1e10:incompletei2e5:peers0:e";
        let result = parse_announce_response(bencoded).unwrap();
        assert_eq!(result.interval, 1800);
    }

    #[test]
    fn interval_falls_back_to_min_interval_when_interval_absent() {
        let bencoded = b"d12:min intervali900e8:completei1e10:incompletei2e5:peers0:e";
        let result = parse_announce_response(bencoded).unwrap();
        assert_eq!(result.interval, 900);
    }

    #[test]
    fn announce_query_sets_started_event() {
        let params = AnnounceParams {
            info_hash: [1u8; 20],
            peer_id: [2u8; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 100,
            event: super::super::AnnounceEvent::Started,
            numwant: 50,
        };
        let query = announce_query(&params);
        assert!(query.contains(&("event".to_string(), "started".to_string())));
        assert!(query.contains(&("numwant".to_string(), "50".to_string())));
    }
}
