//! UDP tracker wire codec (BEP-15): packed big-endian binary, not bencode.
//!
//! Every request after `Connect` needs a `connection_id` obtained from a
//! prior connect round-trip; every response starts with the same 8-byte
//! `<action><transaction_id>` header, which is what makes blind
//! transaction-id matching possible before the rest of the frame is even
//! interpreted.
use std::net::{IpAddr, Ipv4Addr};

use byteorder::{BigEndian, ByteOrder};

use super::{AnnounceParams, AnnounceResult, Peer, ScrapeResult, TrackerError, TrackerResult};

/// The fixed magic connection id used only in the initial `Connect`
/// request, per BEP-15.
pub const PROTOCOL_ID: u64 = 0x0004_1727_1019_80;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;
const ACTION_ERROR: u32 = 3;

fn read_header(bytes: &[u8], expected_transaction_id: u32) -> TrackerResult<u32> {
    if bytes.len() < 8 {
        return Err(TrackerError::Malformed("response shorter than the 8-byte common header"));
    }
    let action = BigEndian::read_u32(&bytes[0..4]);
    let transaction_id = BigEndian::read_u32(&bytes[4..8]);
    if transaction_id != expected_transaction_id {
        return Err(TrackerError::TransactionIdMismatch);
    }
    if action == ACTION_ERROR {
        return Err(TrackerError::Failure(parse_error_message(&bytes[8..])));
    }
    Ok(action)
}

fn parse_error_message(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
}

/// `<8:protocol_id><4:action=0><4:transaction_id>`
pub fn encode_connect_request(transaction_id: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 16];
    BigEndian::write_u64(&mut buf[0..8], PROTOCOL_ID);
    BigEndian::write_u32(&mut buf[8..12], ACTION_CONNECT);
    BigEndian::write_u32(&mut buf[12..16], transaction_id);
    buf
}

/// `<4:action><4:transaction_id><8:connection_id>`
pub fn parse_connect_response(bytes: &[u8], expected_transaction_id: u32) -> TrackerResult<u64> {
    let action = read_header(bytes, expected_transaction_id)?;
    if action != ACTION_CONNECT {
        return Err(TrackerError::ActionMismatch(action));
    }
    if bytes.len() < 16 {
        return Err(TrackerError::Malformed("connect response missing connection_id"));
    }
    Ok(BigEndian::read_u64(&bytes[8..16]))
}

/// `<8:connection_id><4:action=1><4:transaction_id><20:info_hash><20:peer_id>
/// <8:downloaded><8:left><8:uploaded><4:event><4:ip><4:key><4:num_want><2:port>`
pub fn encode_announce_request(
    connection_id: u64,
    transaction_id: u32,
    params: &AnnounceParams,
) -> Vec<u8> {
    let mut buf = vec![0u8; 98];
    BigEndian::write_u64(&mut buf[0..8], connection_id);
    BigEndian::write_u32(&mut buf[8..12], ACTION_ANNOUNCE);
    BigEndian::write_u32(&mut buf[12..16], transaction_id);
    buf[16..36].copy_from_slice(&params.info_hash);
    buf[36..56].copy_from_slice(&params.peer_id);
    BigEndian::write_u64(&mut buf[56..64], params.downloaded.max(0) as u64);
    BigEndian::write_u64(&mut buf[64..72], params.left.max(0) as u64);
    BigEndian::write_u64(&mut buf[72..80], params.uploaded.max(0) as u64);
    BigEndian::write_u32(&mut buf[80..84], params.event.as_udp_code());
    BigEndian::write_u32(&mut buf[84..88], 0); // IP address: 0 lets the tracker use the packet's source
    BigEndian::write_u32(&mut buf[88..92], 0); // key
    BigEndian::write_i32(&mut buf[92..96], params.numwant);
    BigEndian::write_u16(&mut buf[96..98], params.port);
    buf
}

/// `<4:action><4:transaction_id><4:interval><4:leechers><4:seeders>
/// (<4:ip><2:port>)*`
pub fn parse_announce_response(bytes: &[u8], expected_transaction_id: u32) -> TrackerResult<AnnounceResult> {
    let action = read_header(bytes, expected_transaction_id)?;
    if action != ACTION_ANNOUNCE {
        return Err(TrackerError::ActionMismatch(action));
    }
    if bytes.len() < 20 {
        return Err(TrackerError::Malformed("announce response missing interval/leecher/seeder fields"));
    }
    let interval = BigEndian::read_u32(&bytes[8..12]) as i64;
    let leechers = BigEndian::read_u32(&bytes[12..16]) as i64;
    let seeders = BigEndian::read_u32(&bytes[16..20]) as i64;
    let peers = bytes[20..]
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = BigEndian::read_u16(&chunk[4..6]);
            Peer { ip: IpAddr::V4(ip), port }
        })
        .collect();
    Ok(AnnounceResult { interval, seeders, leechers, peers })
}

/// `<8:connection_id><4:action=2><4:transaction_id><20:info_hash>`
pub fn encode_scrape_request(connection_id: u64, transaction_id: u32, info_hash: &[u8; 20]) -> Vec<u8> {
    let mut buf = vec![0u8; 36];
    BigEndian::write_u64(&mut buf[0..8], connection_id);
    BigEndian::write_u32(&mut buf[8..12], ACTION_SCRAPE);
    BigEndian::write_u32(&mut buf[12..16], transaction_id);
    buf[16..36].copy_from_slice(info_hash);
    buf
}

/// `<4:action><4:transaction_id><4:seeders><4:completed><4:leechers>`
pub fn parse_scrape_response(bytes: &[u8], expected_transaction_id: u32) -> TrackerResult<ScrapeResult> {
    let action = read_header(bytes, expected_transaction_id)?;
    if action != ACTION_SCRAPE {
        return Err(TrackerError::ActionMismatch(action));
    }
    if bytes.len() < 20 {
        return Err(TrackerError::Malformed("scrape response missing seeder/completed/leecher fields"));
    }
    Ok(ScrapeResult {
        seeders: BigEndian::read_u32(&bytes[8..12]) as i64,
        completed: BigEndian::read_u32(&bytes[12..16]) as i64,
        leechers: BigEndian::read_u32(&bytes[16..20]) as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::super::AnnounceEvent;
    use super::*;

    #[test]
    fn connect_request_carries_the_bep15_magic() {
        let buf = encode_connect_request(42);
        assert_eq!(BigEndian::read_u64(&buf[0..8]), PROTOCOL_ID);
        assert_eq!(BigEndian::read_u32(&buf[8..12]), ACTION_CONNECT);
        assert_eq!(BigEndian::read_u32(&buf[12..16]), 42);
    }

    #[test]
    fn connect_response_round_trip() {
        let mut resp = vec![0u8; 16];
        BigEndian::write_u32(&mut resp[0..4], ACTION_CONNECT);
        BigEndian::write_u32(&mut resp[4..8], 7);
        BigEndian::write_u64(&mut resp[8..16], 0xdead_beef);
        assert_eq!(parse_connect_response(&resp, 7).unwrap(), 0xdead_beef);
    }

    #[test]
    fn connect_response_rejects_mismatched_transaction_id() {
        let mut resp = vec![0u8; 16];
        BigEndian::write_u32(&mut resp[0..4], ACTION_CONNECT);
        BigEndian::write_u32(&mut resp[4..8], 7);
        assert!(matches!(
            parse_connect_response(&resp, 8),
            Err(TrackerError::TransactionIdMismatch)
        ));
    }

    #[test]
    fn error_action_surfaces_the_message() {
        let mut resp = vec![0u8; 8];
        BigEndian::write_u32(&mut resp[0..4], ACTION_ERROR);
        BigEndian::write_u32(&mut resp[4..8], 1);
        resp.extend_from_slice(b"bad torrent\0");
        match parse_connect_response(&resp, 1) {
            Err(TrackerError::Failure(msg)) => assert_eq!(msg, "bad torrent"),
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn announce_response_parses_peer_list() {
        let mut resp = vec![0u8; 20];
        BigEndian::write_u32(&mut resp[0..4], ACTION_ANNOUNCE);
        BigEndian::write_u32(&mut resp[4..8], 3);
        BigEndian::write_u32(&mut resp[8..12], 1800);
        BigEndian::write_u32(&mut resp[12..16], 4);
        BigEndian::write_u32(&mut resp[16..20], 9);
        resp.extend_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
        let parsed = parse_announce_response(&resp, 3).unwrap();
        assert_eq!(parsed.interval, 1800);
        assert_eq!(parsed.leechers, 4);
        assert_eq!(parsed.seeders, 9);
        assert_eq!(parsed.peers.len(), 1);
        assert_eq!(parsed.peers[0].port, 0x1ae1);
    }

    #[test]
    fn announce_request_encodes_event_code() {
        let params = AnnounceParams {
            info_hash: [1u8; 20],
            peer_id: [2u8; 20],
            port: 6881,
            uploaded: 10,
            downloaded: 20,
            left: 30,
            event: AnnounceEvent::Started,
            numwant: -1,
        };
        let buf = encode_announce_request(99, 5, &params);
        assert_eq!(buf.len(), 98);
        assert_eq!(BigEndian::read_u64(&buf[0..8]), 99);
        assert_eq!(&buf[16..36], &params.info_hash);
        assert_eq!(BigEndian::read_u32(&buf[80..84]), 2); // Started
    }
}
