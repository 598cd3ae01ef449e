//! The length-prefixed message stream that follows a completed handshake.
//!
//! Every frame on the wire is `<u32 length><u8 id><payload>`, except
//! `KeepAlive`, which is the four zero length bytes and nothing else. A
//! [`MessageDecoder`] buffers bytes as they arrive off the socket and only
//! yields a [`Message`] once a complete frame is available — BEP-3 gives no
//! guarantee that a single `read()` lines up with a single message.
use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};

use super::{PeerError, PeerResult};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
const ID_PORT: u8 = 9;

/// One of the eleven message kinds defined by BEP-3 (ten typed messages
/// plus the length-zero keep-alive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    Port { listen_port: u16 },
}

impl Message {
    /// Encodes this message into its wire representation, length prefix
    /// included.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Message::KeepAlive => return 0u32.to_be_bytes().to_vec(),
            Message::Choke => body.push(ID_CHOKE),
            Message::Unchoke => body.push(ID_UNCHOKE),
            Message::Interested => body.push(ID_INTERESTED),
            Message::NotInterested => body.push(ID_NOT_INTERESTED),
            Message::Have { piece_index } => {
                body.push(ID_HAVE);
                body.extend_from_slice(&piece_index.to_be_bytes());
            }
            Message::Bitfield(bits) => {
                body.push(ID_BITFIELD);
                body.extend_from_slice(bits);
            }
            Message::Request { index, begin, length } => {
                body.push(ID_REQUEST);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece { index, begin, block } => {
                body.push(ID_PIECE);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(block);
            }
            Message::Cancel { index, begin, length } => {
                body.push(ID_CANCEL);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            Message::Port { listen_port } => {
                body.push(ID_PORT);
                body.extend_from_slice(&listen_port.to_be_bytes());
            }
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    /// Parses a single complete frame body (the bytes after the length
    /// prefix; empty for `KeepAlive`).
    fn decode_body(body: &[u8]) -> PeerResult<Message> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let id = body[0];
        let payload = &body[1..];
        match id {
            ID_CHOKE => Ok(Message::Choke),
            ID_UNCHOKE => Ok(Message::Unchoke),
            ID_INTERESTED => Ok(Message::Interested),
            ID_NOT_INTERESTED => Ok(Message::NotInterested),
            ID_HAVE => {
                if payload.len() != 4 {
                    return Err(PeerError::FrameTruncated);
                }
                Ok(Message::Have {
                    piece_index: BigEndian::read_u32(payload),
                })
            }
            ID_BITFIELD => Ok(Message::Bitfield(payload.to_vec())),
            ID_REQUEST => {
                if payload.len() != 12 {
                    return Err(PeerError::FrameTruncated);
                }
                Ok(Message::Request {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    length: BigEndian::read_u32(&payload[8..12]),
                })
            }
            ID_PIECE => {
                if payload.len() < 8 {
                    return Err(PeerError::FrameTruncated);
                }
                Ok(Message::Piece {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    block: payload[8..].to_vec(),
                })
            }
            ID_CANCEL => {
                if payload.len() != 12 {
                    return Err(PeerError::FrameTruncated);
                }
                Ok(Message::Cancel {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    length: BigEndian::read_u32(&payload[8..12]),
                })
            }
            ID_PORT => {
                if payload.len() != 2 {
                    return Err(PeerError::FrameTruncated);
                }
                Ok(Message::Port {
                    listen_port: BigEndian::read_u16(payload),
                })
            }
            other => Err(PeerError::UnknownMessage(other)),
        }
    }
}

/// Streaming decoder that accumulates bytes read off a peer socket and
/// yields complete [`Message`]s as they become available.
///
/// The caller is responsible for feeding it raw bytes (`push`) after every
/// `read()`; `try_decode` returns `Ok(None)` rather than erroring when the
/// buffer holds only a partial frame, so a single stalled TCP segment never
/// looks like a protocol violation.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls one message out of the buffer, if a complete frame is present.
    pub fn try_decode(&mut self) -> PeerResult<Option<Message>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = BigEndian::read_u32(&self.buf[0..4]) as usize;
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        self.buf.advance(4);
        let body = self.buf.split_to(len);
        Message::decode_body(&body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_have() {
        let msg = Message::Have { piece_index: 7 };
        let encoded = msg.encode();
        let mut dec = MessageDecoder::new();
        dec.push(&encoded);
        assert_eq!(dec.try_decode().unwrap(), Some(msg));
    }

    #[test]
    fn keep_alive_is_four_zero_bytes() {
        assert_eq!(Message::KeepAlive.encode(), vec![0, 0, 0, 0]);
        let mut dec = MessageDecoder::new();
        dec.push(&[0, 0, 0, 0]);
        assert_eq!(dec.try_decode().unwrap(), Some(Message::KeepAlive));
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let encoded = Message::Piece {
            index: 1,
            begin: 0,
            block: vec![1, 2, 3, 4],
        }
        .encode();
        let mut dec = MessageDecoder::new();
        dec.push(&encoded[..encoded.len() - 1]);
        assert_eq!(dec.try_decode().unwrap(), None);
        dec.push(&encoded[encoded.len() - 1..]);
        assert!(matches!(dec.try_decode().unwrap(), Some(Message::Piece { .. })));
    }

    #[test]
    fn decodes_multiple_messages_fed_byte_at_a_time() {
        let messages = vec![
            Message::Interested,
            Message::Bitfield(vec![0xff, 0x00]),
            Message::Request { index: 2, begin: 0, length: 16384 },
        ];
        let mut stream = Vec::new();
        for m in &messages {
            stream.extend(m.encode());
        }

        let mut dec = MessageDecoder::new();
        let mut decoded = Vec::new();
        for byte in stream {
            dec.push(&[byte]);
            while let Some(msg) = dec.try_decode().unwrap() {
                decoded.push(msg);
            }
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn unknown_message_id_is_rejected() {
        let frame = [0u8, 0, 0, 1, 200];
        let mut dec = MessageDecoder::new();
        dec.push(&frame);
        assert!(matches!(dec.try_decode(), Err(PeerError::UnknownMessage(200))));
    }
}
