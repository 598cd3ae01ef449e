//! The fixed 68-byte handshake frame exchanged before any PWP message.
//!
//! The handshake is the first thing sent and received on a peer
//! connection. It verifies both sides agree on the protocol name and are
//! talking about the same torrent (via `info_hash`) before any message
//! traffic flows.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

use super::{PeerError, PeerResult};

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A BitTorrent peer handshake: protocol identifier, reserved extension
/// bits, the torrent's info hash, and the sender's peer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_len: u8,
    pub protocol: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol_len: 19,
            protocol: *PROTOCOL,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake into its 68-byte wire form:
    /// `<1:len><19:protocol><8:reserved><20:info_hash><20:peer_id>`.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = self.protocol_len;
        buf[1..20].copy_from_slice(&self.protocol);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a 68-byte handshake frame, validating the protocol string
    /// but not the info hash or peer id (callers check those against their
    /// own expectations via [`Handshake::validate`]).
    pub fn parse(buf: &[u8; 68]) -> PeerResult<Self> {
        let protocol_len = buf[0];
        if protocol_len != 19 {
            return Err(PeerError::HandshakeInvalidProtocol(buf[1..20].to_vec()));
        }
        let mut protocol = [0u8; 19];
        protocol.copy_from_slice(&buf[1..20]);
        if &protocol != PROTOCOL {
            return Err(PeerError::HandshakeInvalidProtocol(protocol.to_vec()));
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self {
            protocol_len,
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Reads exactly 68 bytes from `stream` and parses them as a handshake.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> PeerResult<Self> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }

    /// Writes this handshake's wire form to `stream`.
    #[instrument(level = "trace", skip(stream))]
    pub async fn write(&self, stream: &mut TcpStream) -> PeerResult<()> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    /// Checks that this handshake carries the torrent we expect.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> PeerResult<()> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::HandshakeInfoHashMismatch);
        }
        Ok(())
    }
}
