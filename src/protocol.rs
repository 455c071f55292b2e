//! Framed transport (C3): length-prefixed 4-byte-verb messaging over TCP.
//!
//! Wire format, network byte order throughout:
//!
//! ```text
//! offset 0: 4-byte ASCII verb        (exactly 4 chars, space-padded)
//! offset 4: 4-byte big-endian length
//! offset 8: `length` bytes of payload
//! ```
//!
//! Verbs are always exactly four ASCII bytes; short verbs are
//! space-padded (`"REQ "`, `"ACK "`, `"CHK "`). The payload is
//! arbitrary bytes — UTF-8 JSON in practice, but this module does not
//! interpret it.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Length of the fixed header: 4-byte verb + 4-byte big-endian length.
const HEADER_LEN: usize = 8;

/// A 4-byte ASCII verb, always space-padded to exactly four bytes.
pub type Verb = [u8; 4];

/// Configure this satellite. Payload: JSON config.
pub const CONF: Verb = *b"CONF";
/// Acknowledge a request.
pub const ACK: Verb = *b"ACK ";
/// Open a per-satellite request channel.
pub const REQS: Verb = *b"REQS";
/// One epoch tick; payload carries `{"time": t}`.
pub const REQ: Verb = *b"REQ ";
/// Open a long-lived ISL channel to a neighbor.
pub const ISL: Verb = *b"ISL ";
/// Remote cache membership probe.
pub const CHK: Verb = *b"CHK ";
/// Push a prefetch list to a neighbor.
pub const PREF: Verb = *b"PREF";
/// Read an observable (`cache_key`, `cache_capacity`, `cache_size`).
pub const GET: Verb = *b"GET ";
/// Register this satellite's listening port with the orchestrator.
pub const REGR: Verb = *b"REGR";
/// Terminate.
pub const KILL: Verb = *b"KILL";

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload length does not fit in the wire format's 4-byte
    /// big-endian length field.
    #[error("payload of {0} bytes exceeds the protocol's u32 length limit")]
    PayloadTooLarge(usize),

    /// The peer closed the connection before a full frame arrived.
    #[error("connection closed while reading frame: {0}")]
    Truncated(#[from] io::Error),
}

/// Encodes `verb` and `payload` into a single frame: 4-byte verb,
/// 4-byte big-endian length, then the payload bytes.
///
/// # Examples
///
/// ```
/// use orbitcache::protocol::{encode, CHK};
///
/// let frame = encode(CHK, b"12345");
/// assert_eq!(
///     frame,
///     vec![0x43, 0x48, 0x4B, 0x20, 0x00, 0x00, 0x00, 0x05, b'1', b'2', b'3', b'4', b'5']
/// );
/// ```
pub fn encode(verb: Verb, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&verb);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decodes one frame's verb and payload from `bytes`.
///
/// # Examples
///
/// ```
/// use orbitcache::protocol::{decode, CHK};
///
/// let frame = [0x43, 0x48, 0x4B, 0x20, 0x00, 0x00, 0x00, 0x05, b'1', b'2', b'3', b'4', b'5'];
/// let (verb, payload) = decode(&frame).unwrap();
/// assert_eq!(verb, CHK);
/// assert_eq!(payload, b"12345");
/// ```
pub fn decode(bytes: &[u8]) -> Result<(Verb, &[u8]), ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "frame shorter than the 8-byte header",
        )));
    }
    let mut verb = [0u8; 4];
    verb.copy_from_slice(&bytes[0..4]);
    let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() < len {
        return Err(ProtocolError::Truncated(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "payload shorter than the declared length",
        )));
    }
    Ok((verb, &payload[..len]))
}

/// Writes one frame to `writer` in a single call, matching the
/// reference implementation's "build the whole frame, then one
/// `write`" discipline rather than writing the header and payload
/// separately.
pub fn write_frame<W: Write>(writer: &mut W, verb: Verb, payload: &[u8]) -> io::Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            ProtocolError::PayloadTooLarge(payload.len()),
        ));
    }
    writer.write_all(&encode(verb, payload))
}

/// Reads exactly one frame from `reader`, looping until the declared
/// payload length has been fully consumed (readers MUST NOT assume a
/// single `read` call returns the whole payload).
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(Verb, Vec<u8>), ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let mut verb = [0u8; 4];
    verb.copy_from_slice(&header[0..4]);
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok((verb, payload))
}
