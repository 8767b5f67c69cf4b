//! Request/response frame envelopes and their codec.
//!
//! Both directions are implemented symmetrically: the client encodes
//! [`Request`]s and decodes [`Response`]s, while a server (such as the
//! in-process fixture used by the integration tests) decodes requests and
//! encodes responses. Decoding is incremental over a [`BytesMut`]
//! accumulator: a short buffer yields `Ok(None)` and the caller reads more
//! bytes; a malformed header yields a [`ProtocolError`].

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::{Opcode, ResponseStatus};

/// Magic byte opening every request frame.
pub const REQUEST_MAGIC: u8 = 0x80;
/// Magic byte opening every response frame.
pub const RESPONSE_MAGIC: u8 = 0x81;
/// Fixed header length shared by requests and responses.
pub const HEADER_LEN: usize = 24;

/// INCR/DECR expiration sentinel: do not create the item if it is missing.
pub const EXPIRATION_NO_CREATE: u32 = 0xffff_ffff;

// ---------------------------------------------------------------------------
// Extras
// ---------------------------------------------------------------------------

/// Typed request extras.
///
/// Storage commands carry flags + expiration (8 bytes), arithmetic commands
/// carry delta + initial + expiration (20 bytes), TOUCH/GAT/FLUSH carry an
/// expiration (4 bytes), VERBOSITY carries a level (4 bytes). Decoded
/// frames carry the raw bytes; the typed accessors on [`Request`]
/// reinterpret them.
///
/// Expirations are passed through untouched: the server reads values up
/// to 30 days as relative seconds and larger values as absolute unix
/// times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extras {
    None,
    Storage { flags: u32, expiration: u32 },
    Arithmetic { delta: u64, initial: u64, expiration: u32 },
    Expiration(u32),
    Verbosity(u32),
    Raw(Vec<u8>),
}

impl Extras {
    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Extras::None => 0,
            Extras::Storage { .. } => 8,
            Extras::Arithmetic { .. } => 20,
            Extras::Expiration(_) | Extras::Verbosity(_) => 4,
            Extras::Raw(bytes) => bytes.len(),
        }
    }

    /// True when no extras are present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Extras::None => {},
            Extras::Storage { flags, expiration } => {
                buf.put_u32(*flags);
                buf.put_u32(*expiration);
            },
            Extras::Arithmetic {
                delta,
                initial,
                expiration,
            } => {
                buf.put_u64(*delta);
                buf.put_u64(*initial);
                buf.put_u32(*expiration);
            },
            Extras::Expiration(expiration) => buf.put_u32(*expiration),
            Extras::Verbosity(level) => buf.put_u32(*level),
            Extras::Raw(bytes) => buf.put_slice(bytes),
        }
    }
}

// ---------------------------------------------------------------------------
// Header parsing (shared by both directions)
// ---------------------------------------------------------------------------

struct Header {
    opcode_byte: u8,
    key_len: usize,
    extras_len: usize,
    vbucket_or_status: u16,
    total_body_len: usize,
    opaque: u32,
    cas: u64,
}

/// Parses the fixed header if the buffer holds a complete frame.
///
/// Returns `Ok(None)` while the frame is still incomplete. Length
/// consistency is checked before the body is available so a corrupt header
/// cannot make the caller wait for a body that will never arrive.
fn parse_header(buf: &BytesMut, expected_magic: u8) -> Result<Option<Header>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let magic = buf[0];
    if magic != expected_magic {
        return Err(ProtocolError::BadMagic(magic));
    }
    let key_len = (&buf[2..4]).get_u16() as usize;
    let extras_len = buf[4] as usize;
    let vbucket_or_status = (&buf[6..8]).get_u16();
    let total_body_len = (&buf[8..12]).get_u32() as usize;
    if key_len + extras_len > total_body_len {
        return Err(ProtocolError::InconsistentLengths {
            key_len,
            extras_len,
            total_body_len,
        });
    }
    if buf.len() < HEADER_LEN + total_body_len {
        return Ok(None);
    }
    Ok(Some(Header {
        opcode_byte: buf[1],
        key_len,
        extras_len,
        vbucket_or_status,
        total_body_len,
        opaque: (&buf[12..16]).get_u32(),
        cas: (&buf[16..24]).get_u64(),
    }))
}

fn split_body(buf: &mut BytesMut, header: &Header) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let frame = buf.split_to(HEADER_LEN + header.total_body_len);
    let body = &frame[HEADER_LEN..];
    let extras = body[..header.extras_len].to_vec();
    let key = body[header.extras_len..header.extras_len + header.key_len].to_vec();
    let value = body[header.extras_len + header.key_len..].to_vec();
    (extras, key, value)
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An owned request envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub vbucket_id: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Extras,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Request {
    /// Creates an empty request for `opcode`; fields are filled by the
    /// caller through struct update syntax.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            vbucket_id: 0,
            opaque: 0,
            cas: 0,
            extras: Extras::None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Encoded frame length.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.extras.len() + self.key.len() + self.value.len()
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let body_len = self.extras.len() + self.key.len() + self.value.len();
        buf.reserve(HEADER_LEN + body_len);
        buf.put_u8(REQUEST_MAGIC);
        buf.put_u8(self.opcode.code());
        buf.put_u16(self.key.len() as u16);
        buf.put_u8(self.extras.len() as u8);
        buf.put_u8(0); // data type
        buf.put_u16(self.vbucket_id);
        buf.put_u32(body_len as u32);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
        self.extras.encode(buf);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
    }

    /// Decodes one request frame from `buf`, if complete.
    ///
    /// Extras are kept raw; use the typed accessors to interpret them.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
        let header = match parse_header(buf, REQUEST_MAGIC)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let opcode = Opcode::try_from(header.opcode_byte)?;
        let (extras, key, value) = split_body(buf, &header);
        Ok(Some(Request {
            opcode,
            vbucket_id: header.vbucket_or_status,
            opaque: header.opaque,
            cas: header.cas,
            extras: if extras.is_empty() {
                Extras::None
            } else {
                Extras::Raw(extras)
            },
            key,
            value,
        }))
    }

    fn raw_extras(&self) -> &[u8] {
        match &self.extras {
            Extras::Raw(bytes) => bytes,
            _ => &[],
        }
    }

    /// Interprets decoded extras as storage extras (flags, expiration).
    pub fn storage_extras(&self) -> Option<(u32, u32)> {
        let raw = self.raw_extras();
        if raw.len() != 8 {
            return None;
        }
        Some(((&raw[0..4]).get_u32(), (&raw[4..8]).get_u32()))
    }

    /// Interprets decoded extras as arithmetic extras
    /// (delta, initial, expiration).
    pub fn arithmetic_extras(&self) -> Option<(u64, u64, u32)> {
        let raw = self.raw_extras();
        if raw.len() != 20 {
            return None;
        }
        Some((
            (&raw[0..8]).get_u64(),
            (&raw[8..16]).get_u64(),
            (&raw[16..20]).get_u32(),
        ))
    }

    /// Interprets decoded extras as a lone expiration (TOUCH/GAT/FLUSH).
    pub fn expiration_extras(&self) -> Option<u32> {
        let raw = self.raw_extras();
        if raw.len() != 4 {
            return None;
        }
        Some((&raw[0..4]).get_u32())
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// An owned response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: Opcode,
    pub status: ResponseStatus,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Response {
    /// Creates an empty response echoing `opcode` and `opaque`.
    pub fn new(opcode: Opcode, status: ResponseStatus, opaque: u32) -> Self {
        Self {
            opcode,
            status,
            opaque,
            cas: 0,
            extras: Vec::new(),
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let body_len = self.extras.len() + self.key.len() + self.value.len();
        buf.reserve(HEADER_LEN + body_len);
        buf.put_u8(RESPONSE_MAGIC);
        buf.put_u8(self.opcode.code());
        buf.put_u16(self.key.len() as u16);
        buf.put_u8(self.extras.len() as u8);
        buf.put_u8(0); // data type
        buf.put_u16(self.status.code());
        buf.put_u32(body_len as u32);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
        buf.put_slice(&self.extras);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
    }

    /// Decodes one response frame from `buf`, if complete.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        let header = match parse_header(buf, RESPONSE_MAGIC)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let opcode = Opcode::try_from(header.opcode_byte)?;
        let status = ResponseStatus::try_from(header.vbucket_or_status)?;
        let (extras, key, value) = split_body(buf, &header);
        Ok(Some(Response {
            opcode,
            status,
            opaque: header.opaque,
            cas: header.cas,
            extras,
            key,
            value,
        }))
    }

    /// True for `NoError`.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Item flags from GET-family extras.
    pub fn flags(&self) -> Option<u32> {
        if self.extras.len() < 4 {
            return None;
        }
        Some((&self.extras[0..4]).get_u32())
    }

    /// INCR/DECR result: the 8-byte big-endian counter in the body.
    pub fn counter_value(&self) -> Option<u64> {
        if self.value.len() != 8 {
            return None;
        }
        Some((&self.value[..]).get_u64())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
