//! Bencode: the self-describing binary encoding used throughout BitTorrent.
//!
//! A [`BencodeValue`] is one of four kinds: signed integer, raw byte string,
//! ordered list, or dictionary keyed by raw byte strings. The encoder is the
//! canonicalizer — dictionary keys are always emitted in ascending
//! lexicographic order of their raw bytes, which is what makes re-encoding
//! the `info` sub-tree of a torrent file produce a stable info-hash.
use std::collections::HashMap;
use std::io::{Cursor, Read};
use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// A decoded bencode value.
///
/// Dictionary iteration order is insertion order, matching the decoder's
/// read order; it is the encoder's job to sort keys on the way back out.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&HashMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_dict(self) -> Option<HashMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Custom error type for Bencode operations.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bencode format: {0}")]
    InvalidFormat(String),

    #[error("Invalid integer format")]
    InvalidInteger,

    #[error("Invalid string length")]
    InvalidStringLength,

    #[error("Unexpected end of input")]
    UnexpectedEOI,

    #[error("Trailing bytes after a complete value")]
    TrailingBytes,

    #[error("Dictionary keys must be byte strings")]
    DictKeyNotString,
}

/// Result type for bencode operations.
pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

/// Decodes a single bencode value from `bytes`, rejecting any trailing data.
///
/// Both of this crate's callers (a metainfo file, an HTTP tracker reply)
/// hand us exactly one complete value, so unlike a generic streaming
/// decoder, this entry point is strict about the buffer being fully
/// consumed.
pub fn decode(bytes: &[u8]) -> BencodeResult<BencodeValue> {
    let mut reader = Cursor::new(bytes).bytes().peekable();
    let value = decoder::decode_next(&mut reader)?;
    if reader.peek().is_some() {
        return Err(BencodeError::TrailingBytes);
    }
    Ok(value)
}

/// Encodes `value` into its canonical bencode representation.
pub fn encode(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    encoder::encode(&mut buf, value)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_negative_integer() {
        assert_eq!(decode(b"i42e").unwrap(), BencodeValue::Integer(42));
        assert_eq!(decode(b"i-1000e").unwrap(), BencodeValue::Integer(-1000));
    }

    #[test]
    fn rejects_negative_zero() {
        assert!(decode(b"i-0e").is_err());
    }

    #[test]
    fn rejects_leading_zero() {
        assert!(decode(b"i042e").is_err());
    }

    #[test]
    fn encodes_negative_integer() {
        let bytes = encode(&BencodeValue::Integer(-1000)).unwrap();
        assert_eq!(bytes, b"i-1000e");
    }

    #[test]
    fn dict_keys_are_sorted_on_encode() {
        let mut dict = HashMap::new();
        dict.insert(b"b".to_vec(), BencodeValue::Integer(1));
        dict.insert(b"a".to_vec(), BencodeValue::Integer(2));
        let bytes = encode(&BencodeValue::Dict(dict)).unwrap();
        assert_eq!(bytes, b"d1:ai2e1:bi1ee");
    }

    #[test]
    fn round_trips_nested_value() {
        let value = BencodeValue::List(vec![
            BencodeValue::String(b"spam".to_vec()),
            BencodeValue::Integer(42),
            BencodeValue::List(vec![BencodeValue::Integer(1), BencodeValue::Integer(2)]),
        ]);
        let encoded = encode(&value).unwrap();
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn encode_is_idempotent_on_canonical_input() {
        let mut dict = HashMap::new();
        dict.insert(b"announce".to_vec(), BencodeValue::String(b"http://t".to_vec()));
        dict.insert(b"comment".to_vec(), BencodeValue::String(b"hi".to_vec()));
        let value = BencodeValue::Dict(dict);
        let once = encode(&value).unwrap();
        let twice = encode(&decode(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn preserves_duplicate_and_unsorted_keys_on_decode() {
        // Not canonical input, but the decoder must not reject it: some
        // real-world feeds send unsorted or duplicate keys.
        let value = decode(b"d1:bi1e1:ai2ee").unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.get(&b"a".to_vec()).unwrap().as_integer(), Some(2));
        assert_eq!(dict.get(&b"b".to_vec()).unwrap().as_integer(), Some(1));
    }

    #[test]
    fn dict_requires_byte_string_keys() {
        assert!(decode(b"di1ei2ee").is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert!(decode(b"i1ei2e").is_err());
    }

    #[test]
    fn partial_frame_robustness_byte_at_a_time() {
        let messages = vec![
            BencodeValue::Integer(7),
            BencodeValue::String(b"hello".to_vec()),
        ];
        let mut stream = Vec::new();
        for m in &messages {
            stream.extend(encode(m).unwrap());
        }

        // Feed the decoder the concatenated stream one byte at a time and
        // make sure it recovers exactly the original sequence.
        let mut reader = Cursor::new(&stream).bytes().peekable();
        let mut decoded = Vec::new();
        while reader.peek().is_some() {
            decoded.push(decoder::decode_next(&mut reader).unwrap());
        }
        assert_eq!(decoded, messages);
    }
}
