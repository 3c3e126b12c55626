//! # CoAP Message Codec
//!
//! OIC devices speak CoAP (RFC 7252) over UDP. This module turns datagrams
//! into [`Packet`] values and back. It knows nothing about resources; the
//! registry in [`crate::oic`] decides what a packet means.
//!
//! Wire layout:
//!
//! ```text
//!  0                   1                   2                   3
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! |   Token (0..8 bytes) ...
//! |   Options (delta/length nibbles, ascending option number) ...
//! |1 1 1 1 1 1 1 1|    Payload ...
//! ```
//!
//! Every packet is tagged with its peer as an `"a.b.c.d port"` string (see
//! [`format_address`]), the sender for inbound packets and the destination
//! for outbound ones.

mod address;

pub use address::{format_address, normalize, parse_address};

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Fixed header size; anything shorter is not a CoAP message.
pub const HEADER_LEN: usize = 4;
const VERSION: u8 = 1;
const PAYLOAD_MARKER: u8 = 0xFF;
const MAX_TOKEN_LEN: usize = 8;

pub const OPTION_OBSERVE: u16 = 6;
pub const OPTION_URI_PATH: u16 = 11;
pub const OPTION_CONTENT_FORMAT: u16 = 12;
pub const OPTION_URI_QUERY: u16 = 15;
pub const OPTION_ACCEPT: u16 = 17;

/// application/cbor
pub const CONTENT_FORMAT_CBOR: u16 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoapError {
    #[error("datagram of {0} bytes is shorter than the CoAP header")]
    TooShort(usize),

    #[error("unsupported CoAP version {0}")]
    BadVersion(u8),

    #[error("token length {0} exceeds 8")]
    BadTokenLength(u8),

    #[error("message truncated at offset {0}")]
    Truncated(usize),

    #[error("reserved option nibble at offset {0}")]
    ReservedNibble(usize),

    #[error("payload marker without payload")]
    EmptyPayload,

    #[error("invalid peer address {0:?}, expected \"a.b.c.d port\"")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    fn bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

/// Request method or response code, `class.detail` packed as `ccc ddddd`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0x00);
    pub const GET: Code = Code(0x01);
    pub const POST: Code = Code(0x02);
    pub const PUT: Code = Code(0x03);
    pub const DELETE: Code = Code(0x04);
    pub const CREATED: Code = Code::new(2, 1);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);

    pub const fn new(class: u8, detail: u8) -> Self {
        Code((class << 5) | (detail & 0x1F))
    }

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    pub fn is_request(self) -> bool {
        self.class() == 0 && self.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Debug for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Code::GET => write!(f, "GET"),
            Code::POST => write!(f, "POST"),
            Code::PUT => write!(f, "PUT"),
            Code::DELETE => write!(f, "DELETE"),
            c => write!(f, "{}.{:02}", c.class(), c.detail()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub msg_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    options: Vec<CoapOption>,
    pub payload: Vec<u8>,
    address: String,
}

impl Packet {
    pub fn new(msg_type: MessageType, code: Code, message_id: u16, address: impl Into<String>) -> Self {
        Self {
            msg_type,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
            address: address.into(),
        }
    }

    /// Parse one datagram received from `address` (`"a.b.c.d port"`).
    pub fn parse(data: &[u8], address: &str) -> Result<Packet, CoapError> {
        if data.len() < HEADER_LEN {
            return Err(CoapError::TooShort(data.len()));
        }
        let version = data[0] >> 6;
        if version != VERSION {
            return Err(CoapError::BadVersion(version));
        }
        let msg_type = MessageType::from_bits(data[0] >> 4);
        let tkl = data[0] & 0x0F;
        if tkl as usize > MAX_TOKEN_LEN {
            return Err(CoapError::BadTokenLength(tkl));
        }
        let code = Code(data[1]);
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let mut pos = HEADER_LEN;
        let token_end = pos + tkl as usize;
        if token_end > data.len() {
            return Err(CoapError::Truncated(pos));
        }
        let token = data[pos..token_end].to_vec();
        pos = token_end;

        let mut options = Vec::new();
        let mut number: u16 = 0;
        let mut payload = Vec::new();
        while pos < data.len() {
            let byte = data[pos];
            if byte == PAYLOAD_MARKER {
                pos += 1;
                if pos == data.len() {
                    return Err(CoapError::EmptyPayload);
                }
                payload = data[pos..].to_vec();
                break;
            }
            let header_at = pos;
            pos += 1;
            let delta = read_extended(data, &mut pos, byte >> 4, header_at)?;
            let len = read_extended(data, &mut pos, byte & 0x0F, header_at)? as usize;
            number = number
                .checked_add(delta)
                .ok_or(CoapError::Truncated(header_at))?;
            if pos + len > data.len() {
                return Err(CoapError::Truncated(pos));
            }
            options.push(CoapOption {
                number,
                value: data[pos..pos + len].to_vec(),
            });
            pos += len;
        }

        Ok(Packet {
            msg_type,
            code,
            message_id,
            token,
            options,
            payload,
            address: address.to_string(),
        })
    }

    /// Serialize to wire bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.token.len() + self.payload.len() + 32);
        buf.put_u8((VERSION << 6) | (self.msg_type.bits() << 4) | self.token.len() as u8);
        buf.put_u8(self.code.0);
        buf.put_u16(self.message_id);
        buf.put_slice(&self.token);

        let mut last = 0u16;
        for opt in &self.options {
            let delta = opt.number - last;
            last = opt.number;
            let (dn, dext) = nibble(delta);
            let (ln, lext) = nibble(opt.value.len() as u16);
            buf.put_u8((dn << 4) | ln);
            buf.put_slice(&dext);
            buf.put_slice(&lext);
            buf.put_slice(&opt.value);
        }
        if !self.payload.is_empty() {
            buf.put_u8(PAYLOAD_MARKER);
            buf.put_slice(&self.payload);
        }
        buf.to_vec()
    }

    /// Peer address string: sender for inbound, destination for outbound.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    pub fn options(&self) -> &[CoapOption] {
        &self.options
    }

    /// Add an option, keeping the list ordered by option number. Repeated
    /// options keep their insertion order.
    pub fn add_option(&mut self, number: u16, value: impl Into<Vec<u8>>) {
        let at = self
            .options
            .iter()
            .position(|o| o.number > number)
            .unwrap_or(self.options.len());
        self.options.insert(
            at,
            CoapOption {
                number,
                value: value.into(),
            },
        );
    }

    pub fn add_uint_option(&mut self, number: u16, value: u32) {
        self.add_option(number, encode_uint(value));
    }

    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    fn first_uint(&self, number: u16) -> Option<u32> {
        self.option_values(number).next().map(decode_uint)
    }

    /// Uri-Path segments joined as an absolute path; `/` when absent.
    pub fn uri_path(&self) -> String {
        let mut path = String::new();
        for seg in self.option_values(OPTION_URI_PATH) {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(seg));
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }

    pub fn set_uri_path(&mut self, path: &str) {
        self.options.retain(|o| o.number != OPTION_URI_PATH);
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(OPTION_URI_PATH, seg.as_bytes());
        }
    }

    pub fn uri_query(&self) -> Vec<String> {
        self.option_values(OPTION_URI_QUERY)
            .map(|q| String::from_utf8_lossy(q).into_owned())
            .collect()
    }

    pub fn observe(&self) -> Option<u32> {
        self.first_uint(OPTION_OBSERVE)
    }

    pub fn content_format(&self) -> Option<u16> {
        self.first_uint(OPTION_CONTENT_FORMAT).map(|v| v as u16)
    }

    /// Build a response skeleton for this request: piggybacked ACK for
    /// confirmable requests, NON with `fresh_mid` otherwise.
    pub fn response(&self, code: Code, fresh_mid: u16) -> Packet {
        let (msg_type, mid) = match self.msg_type {
            MessageType::Confirmable => (MessageType::Acknowledgement, self.message_id),
            _ => (MessageType::NonConfirmable, fresh_mid),
        };
        let mut resp = Packet::new(msg_type, code, mid, self.address.clone());
        resp.token = self.token.clone();
        resp
    }
}

fn read_extended(data: &[u8], pos: &mut usize, nib: u8, header_at: usize) -> Result<u16, CoapError> {
    match nib {
        0..=12 => Ok(nib as u16),
        13 => {
            let b = *data.get(*pos).ok_or(CoapError::Truncated(*pos))?;
            *pos += 1;
            Ok(b as u16 + 13)
        }
        14 => {
            if *pos + 2 > data.len() {
                return Err(CoapError::Truncated(*pos));
            }
            let v = u16::from_be_bytes([data[*pos], data[*pos + 1]]);
            *pos += 2;
            v.checked_add(269).ok_or(CoapError::Truncated(header_at))
        }
        _ => Err(CoapError::ReservedNibble(header_at)),
    }
}

fn nibble(v: u16) -> (u8, Vec<u8>) {
    match v {
        0..=12 => (v as u8, Vec::new()),
        13..=268 => (13, vec![(v - 13) as u8]),
        _ => (14, (v - 269).to_be_bytes().to_vec()),
    }
}

/// Minimal big-endian unsigned encoding; zero is the empty string.
pub fn encode_uint(v: u32) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

pub fn decode_uint(raw: &[u8]) -> u32 {
    raw.iter().take(4).fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: &str = "192.168.1.20 40000";

    // CON GET /oic/res, mid 0x1234, token 0xA1 0xB2
    fn discovery_get() -> Vec<u8> {
        vec![
            0x42, 0x01, 0x12, 0x34, 0xA1, 0xB2, 0xB3, b'o', b'i', b'c', 0x03, b'r', b'e', b's',
        ]
    }

    #[test]
    fn parses_header_token_and_path() {
        let p = Packet::parse(&discovery_get(), PEER).expect("parse");
        assert_eq!(p.msg_type, MessageType::Confirmable);
        assert_eq!(p.code, Code::GET);
        assert_eq!(p.message_id, 0x1234);
        assert_eq!(p.token, vec![0xA1, 0xB2]);
        assert_eq!(p.uri_path(), "/oic/res");
        assert_eq!(p.address(), PEER);
        assert!(p.payload.is_empty());
    }

    #[test]
    fn short_datagrams_are_rejected() {
        for len in 0..HEADER_LEN {
            let data = vec![0x40; len];
            assert_eq!(Packet::parse(&data, PEER), Err(CoapError::TooShort(len)));
        }
    }

    #[test]
    fn rejects_bad_version_and_token_length() {
        assert_eq!(
            Packet::parse(&[0x80, 0x01, 0, 1], PEER),
            Err(CoapError::BadVersion(2))
        );
        assert_eq!(
            Packet::parse(&[0x49, 0x01, 0, 1], PEER),
            Err(CoapError::BadTokenLength(9))
        );
        assert_eq!(
            Packet::parse(&[0x44, 0x01, 0, 1, 0xAA], PEER),
            Err(CoapError::Truncated(4))
        );
    }

    #[test]
    fn rejects_marker_without_payload_and_reserved_nibble() {
        assert_eq!(
            Packet::parse(&[0x40, 0x02, 0, 1, 0xFF], PEER),
            Err(CoapError::EmptyPayload)
        );
        assert_eq!(
            Packet::parse(&[0x40, 0x01, 0, 1, 0xF1, 0x00], PEER),
            Err(CoapError::ReservedNibble(4))
        );
    }

    #[test]
    fn build_then_parse_keeps_extended_options() {
        let mut p = Packet::new(MessageType::NonConfirmable, Code::CONTENT, 7, PEER);
        p.token = vec![1, 2, 3, 4];
        p.add_uint_option(OPTION_CONTENT_FORMAT, CONTENT_FORMAT_CBOR as u32);
        p.add_uint_option(OPTION_OBSERVE, 300);
        // long value forces the 13-extended length form
        p.add_option(OPTION_URI_QUERY, vec![b'q'; 40]);
        // option number far enough to need the 14-extended delta form
        p.add_option(2049, b"x".to_vec());
        p.payload = vec![0xA0];
        let bytes = p.build();
        let back = Packet::parse(&bytes, PEER).expect("parse");
        assert_eq!(back, p);
        assert_eq!(back.observe(), Some(300));
        assert_eq!(back.content_format(), Some(CONTENT_FORMAT_CBOR));
    }

    #[test]
    fn response_piggybacks_on_confirmable() {
        let req = Packet::parse(&discovery_get(), PEER).unwrap();
        let ack = req.response(Code::CONTENT, 99);
        assert_eq!(ack.msg_type, MessageType::Acknowledgement);
        assert_eq!(ack.message_id, 0x1234);
        assert_eq!(ack.token, req.token);

        let mut non = req.clone();
        non.msg_type = MessageType::NonConfirmable;
        let resp = non.response(Code::CONTENT, 99);
        assert_eq!(resp.msg_type, MessageType::NonConfirmable);
        assert_eq!(resp.message_id, 99);
    }

    #[test]
    fn uint_option_encoding_is_minimal() {
        assert!(encode_uint(0).is_empty());
        assert_eq!(encode_uint(60), vec![60]);
        assert_eq!(encode_uint(0x0102), vec![1, 2]);
        assert_eq!(decode_uint(&[1, 2]), 0x0102);
    }

    #[test]
    fn set_uri_path_splits_segments() {
        let mut p = Packet::new(MessageType::Confirmable, Code::PUT, 1, PEER);
        p.set_uri_path("/lampa/floor");
        assert_eq!(p.uri_path(), "/lampa/floor");
        assert_eq!(p.option_values(OPTION_URI_PATH).count(), 2);
    }
}
