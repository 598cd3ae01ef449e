//! Per-peer connection lifecycle and choke/interest state.
//!
//! A [`PeerSession`] owns one TCP connection to one peer: it drives the
//! connect → handshake → ready lifecycle, tracks the six BEP-3 flags, and
//! turns incoming [`Message`]s into [`PeerEvent`]s for the torrent driver.
//! Piece selection and storage are out of scope here — this module only
//! speaks the wire protocol and reports what happened.
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::instrument;

use super::handshake::Handshake;
use super::message::{Message, MessageDecoder};
use super::{PeerError, PeerResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// BEP-3 recommends treating a peer as dead after two minutes of silence;
/// we send our own keep-alive a little under that.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(115);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    NotConnected,
    Connecting,
    Handshaking,
    Ready,
    Destroyed,
}

/// The six booleans BEP-3 defines for a peer connection. Both sides start
/// choked and not interested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerFlags {
    pub handshaked: bool,
    pub bitfielded: bool,
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for PeerFlags {
    fn default() -> Self {
        Self {
            handshaked: false,
            bitfielded: false,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// What to tell the torrent driver after processing an incoming message.
/// Events that imply data-plane work (requests, blocks, cancels, the DHT
/// port hint) are surfaced rather than acted on here — piece storage and
/// the request queue live above this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Choked,
    Unchoked,
    Interested,
    NotInterested,
    Have(u32),
    BitfieldReceived,
    BlockRequested { index: u32, begin: u32, length: u32 },
    BlockReceived { index: u32, begin: u32, block: Vec<u8> },
    CancelRequested { index: u32, begin: u32, length: u32 },
    PortAnnounced(u16),
}

/// The outcome of feeding one [`Message`] into a session: an event for the
/// caller, and optionally a reply the caller should send back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageOutcome {
    pub event: Option<PeerEvent>,
    pub reply: Option<Message>,
}

/// Decides whether to unchoke a peer that has just declared itself
/// interested. The default mirrors the reference client: unchoke
/// immediately. Callers driving a real choke algorithm (tit-for-tat,
/// optimistic unchoke rotation) can supply their own.
pub trait UnchokePolicy: fmt::Debug + Send + Sync {
    fn should_unchoke(&self, flags: &PeerFlags) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoUnchokePolicy;

impl UnchokePolicy for AutoUnchokePolicy {
    fn should_unchoke(&self, _flags: &PeerFlags) -> bool {
        true
    }
}

pub struct PeerSession {
    pub addr: SocketAddr,
    pub peer_id: Option<[u8; 20]>,
    pub state: PeerState,
    pub flags: PeerFlags,
    pub bitfield: Vec<u8>,
    expected_bitfield_len: usize,
    stream: Option<TcpStream>,
    decoder: MessageDecoder,
    last_activity: Instant,
    unchoke_policy: Box<dyn UnchokePolicy>,
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("addr", &self.addr)
            .field("peer_id", &self.peer_id)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .finish()
    }
}

impl PeerSession {
    /// `pieces_amount` sizes the expected bitfield length
    /// (`ceil(pieces_amount / 8)` bytes); a `Bitfield` message of any other
    /// length is rejected and the peer destroyed.
    pub fn new(addr: SocketAddr, pieces_amount: usize) -> Self {
        let expected_bitfield_len = pieces_amount.div_ceil(8);
        Self {
            addr,
            peer_id: None,
            state: PeerState::NotConnected,
            flags: PeerFlags::default(),
            bitfield: vec![0u8; expected_bitfield_len],
            expected_bitfield_len,
            stream: None,
            decoder: MessageDecoder::new(),
            last_activity: Instant::now(),
            unchoke_policy: Box::new(AutoUnchokePolicy),
        }
    }

    pub fn with_unchoke_policy(mut self, policy: Box<dyn UnchokePolicy>) -> Self {
        self.unchoke_policy = policy;
        self
    }

    pub fn destroy(&mut self) {
        self.state = PeerState::Destroyed;
        self.stream = None;
    }

    /// Connects to the peer and exchanges handshakes. `expected_peer_id`
    /// is the id the tracker advertised for this peer, if any — a mismatch
    /// against what the peer sends back is treated as a protocol error.
    #[instrument(level = "debug", skip(self, info_hash, our_peer_id))]
    pub async fn connect(
        &mut self,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        expected_peer_id: Option<[u8; 20]>,
    ) -> PeerResult<()> {
        self.state = PeerState::Connecting;
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .map_err(|_| PeerError::ConnectTimeout)??;

        self.state = PeerState::Handshaking;
        let ours = Handshake::new(info_hash, our_peer_id);
        ours.write(&mut stream).await?;

        let theirs = timeout(HANDSHAKE_TIMEOUT, Handshake::read(&mut stream))
            .await
            .map_err(|_| PeerError::HandshakeTimeout)??;
        theirs.validate(info_hash)?;

        if let Some(expected) = expected_peer_id {
            if theirs.peer_id != expected {
                return Err(PeerError::HandshakePeerIdMismatch {
                    expected,
                    got: theirs.peer_id,
                });
            }
        }

        self.peer_id = Some(theirs.peer_id);
        self.flags.handshaked = true;
        self.stream = Some(stream);
        self.state = PeerState::Ready;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Feeds freshly-read bytes into the session's decode buffer, draining
    /// and handling every complete message currently available.
    ///
    /// An unrecognized message id is not fatal: the decoder has already
    /// advanced past the malformed frame by its declared length, so we log
    /// and keep draining rather than tearing down the connection.
    pub fn handle_bytes(&mut self, bytes: &[u8]) -> PeerResult<Vec<MessageOutcome>> {
        self.decoder.push(bytes);
        let mut outcomes = Vec::new();
        loop {
            match self.decoder.try_decode() {
                Ok(Some(msg)) => outcomes.push(self.handle_message(msg)?),
                Ok(None) => break,
                Err(PeerError::UnknownMessage(id)) => {
                    tracing::debug!(addr = %self.addr, id, "skipping unknown PWP message");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(outcomes)
    }

    /// Dispatches a single decoded message, updating flags/bitfield and
    /// producing the event (and optional reply) the driver should act on.
    pub fn handle_message(&mut self, msg: Message) -> PeerResult<MessageOutcome> {
        self.last_activity = Instant::now();
        match msg {
            Message::KeepAlive => Ok(MessageOutcome { event: None, reply: Some(Message::KeepAlive) }),
            Message::Choke => {
                self.flags.peer_choking = true;
                Ok(MessageOutcome { event: Some(PeerEvent::Choked), reply: None })
            }
            Message::Unchoke => {
                self.flags.peer_choking = false;
                Ok(MessageOutcome { event: Some(PeerEvent::Unchoked), reply: None })
            }
            Message::Interested => {
                self.flags.peer_interested = true;
                let reply = if self.flags.am_choking && self.unchoke_policy.should_unchoke(&self.flags) {
                    self.flags.am_choking = false;
                    Some(Message::Unchoke)
                } else {
                    None
                };
                Ok(MessageOutcome { event: Some(PeerEvent::Interested), reply })
            }
            Message::NotInterested => {
                self.flags.peer_interested = false;
                Ok(MessageOutcome { event: Some(PeerEvent::NotInterested), reply: None })
            }
            Message::Have { piece_index } => {
                let byte_index = (piece_index / 8) as usize;
                if byte_index < self.bitfield.len() {
                    self.bitfield[byte_index] |= 1 << (7 - (piece_index % 8));
                }
                Ok(MessageOutcome { event: Some(PeerEvent::Have(piece_index)), reply: None })
            }
            Message::Bitfield(bits) => {
                if bits.len() != self.expected_bitfield_len {
                    return Err(PeerError::BadBitfieldLength {
                        expected: self.expected_bitfield_len,
                        actual: bits.len(),
                    });
                }
                // Only the first bitfield is honored; BEP-3 allows at most one,
                // sent immediately after the handshake.
                if !self.flags.bitfielded {
                    self.bitfield = bits;
                    self.flags.bitfielded = true;
                }
                Ok(MessageOutcome { event: Some(PeerEvent::BitfieldReceived), reply: None })
            }
            Message::Request { index, begin, length } => Ok(MessageOutcome {
                event: Some(PeerEvent::BlockRequested { index, begin, length }),
                reply: None,
            }),
            Message::Piece { index, begin, block } => Ok(MessageOutcome {
                event: Some(PeerEvent::BlockReceived { index, begin, block }),
                reply: None,
            }),
            Message::Cancel { index, begin, length } => Ok(MessageOutcome {
                event: Some(PeerEvent::CancelRequested { index, begin, length }),
                reply: None,
            }),
            Message::Port { listen_port } => Ok(MessageOutcome {
                event: Some(PeerEvent::PortAnnounced(listen_port)),
                reply: None,
            }),
        }
    }

    /// Whether a keep-alive is due given how long it's been since any
    /// traffic was seen from or sent to this peer.
    pub fn keep_alive_due(&self) -> bool {
        self.last_activity.elapsed() >= KEEP_ALIVE_INTERVAL
    }

    pub fn note_sent(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Reads whatever is available off the wire and hands back the
    /// outcomes of every message it completed. A zero-length read means
    /// the peer closed the connection.
    pub async fn read_and_handle(&mut self) -> PeerResult<Vec<MessageOutcome>> {
        let stream = self.stream.as_mut().ok_or(PeerError::Cancelled)?;
        let mut buf = [0u8; 16 * 1024];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(PeerError::Cancelled);
        }
        self.handle_bytes(&buf[..n])
    }

    pub async fn send(&mut self, msg: &Message) -> PeerResult<()> {
        let stream = self.stream.as_mut().ok_or(PeerError::Cancelled)?;
        stream.write_all(&msg.encode()).await?;
        self.note_sent();
        Ok(())
    }
}
