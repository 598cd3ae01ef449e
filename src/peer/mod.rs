//! Peer wire protocol (PWP) and per-peer session state.
//!
//! This module owns the 68-byte handshake frame, the length-prefixed
//! message codec built on top of it, and the small state machine that
//! tracks one peer connection's lifecycle and choke/interest flags.
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("invalid protocol string: {0:?}")]
    HandshakeInvalidProtocol(Vec<u8>),

    #[error("info hash mismatch")]
    HandshakeInfoHashMismatch,

    #[error("peer id mismatch: expected {expected:?}, got {got:?}")]
    HandshakePeerIdMismatch { expected: [u8; 20], got: [u8; 20] },

    #[error("unknown message id: {0}")]
    UnknownMessage(u8),

    #[error("truncated frame")]
    FrameTruncated,

    #[error("bitfield length {actual} does not match expected {expected}")]
    BadBitfieldLength { expected: usize, actual: usize },

    #[error("peer session cancelled")]
    Cancelled,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
