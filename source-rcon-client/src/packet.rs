//! Encoding, decoding and classification of Source RCON packets.
//!
//! Every frame on the wire has the same little-endian layout:
//!
//! ```text
//! ┌────────────┬────────────┬────────────┬─────────────┬──────┬──────┐
//! │ Length     │ Request ID │ Type       │ Payload     │ 0x00 │ 0x00 │
//! │ i32        │ i32        │ i32        │ 0..=max     │ term │ pad  │
//! └────────────┴────────────┴────────────┴─────────────┴──────┴──────┘
//! ```
//!
//! `Length` counts every byte after itself, so a frame occupies `Length + 4`
//! bytes on the wire. The meaning of `Type` depends on whether the frame is a
//! request or a response, which is why [`Packet`] carries its [`Direction`].

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

/// Smallest declared length: request id, type, payload terminator and pad.
pub const LENGTH_MIN: i32 = 10;

/// Largest declared length of any frame.
pub const LENGTH_MAX: i32 = LENGTH_MIN + response::PAYLOAD_MAX as i32;

/// Size of the length prefix itself.
pub const LENGTH_PREFIX: usize = 4;

/// Length prefix, request id and type.
pub const HEADER_LEN: usize = 12;

/// Largest number of bytes a single frame can occupy on the wire.
pub const SIZE_MAX: usize = LENGTH_MAX as usize + LENGTH_PREFIX;

/// Request id a server answers with when the password was rejected.
pub const ID_INVALID: i32 = -1;

/// Type codes and limits for frames sent by the client.
pub mod request {
    pub const LOGIN: i32 = 3;
    pub const COMMAND: i32 = 2;
    pub const PAYLOAD_MAX: usize = 1024;
}

/// Type codes and limits for frames sent by the server.
pub mod response {
    pub const LOGIN: i32 = 2;
    pub const COMMAND: i32 = 0;
    pub const PAYLOAD_MAX: usize = 4096;
}

/// Which side of the conversation produced a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn payload_max(self) -> usize {
        match self {
            Direction::Request => request::PAYLOAD_MAX,
            Direction::Response => response::PAYLOAD_MAX,
        }
    }
}

/// Semantic category of a packet once its type code has been resolved
/// against its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Login,
    Command,
    /// Authentication was rejected by the server.
    Invalid,
    /// The type code is outside the documented set.
    Unknown,
}

impl Class {
    pub fn name(self) -> &'static str {
        match self {
            Class::Login => "login",
            Class::Command => "command",
            Class::Invalid => "invalid",
            Class::Unknown => "unknown",
        }
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub class: Class,
    pub payload_max: usize,
}

/// Structural problems found while building or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("payload is too small to form a valid frame")]
    PayloadTooSmall,

    #[error("request payload contains a NUL byte")]
    PayloadContainsNul,

    #[error("declared length {0} is below the minimum of 10")]
    LengthTooSmall(i32),

    #[error("declared length {length} exceeds the maximum of {max}")]
    LengthTooLarge { length: i32, max: i32 },

    #[error("expected type {expected}, found {actual}")]
    TypeMismatch { expected: i32, actual: i32 },

    #[error("declared length {declared} does not match consumed length {actual}")]
    PayloadLengthMismatch { declared: i32, actual: i32 },

    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    declared_length: i32,
    request_id: i32,
    kind_code: i32,
    payload: Vec<u8>,
    direction: Direction,
    raw: Vec<u8>,
}

impl Packet {
    pub fn declared_length(&self) -> i32 {
        self.declared_length
    }

    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    pub fn kind_code(&self) -> i32 {
        self.kind_code
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text. Servers are not consistent about encodings, so
    /// invalid UTF-8 is replaced rather than rejected.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn into_payload_text(self) -> String {
        match String::from_utf8(self.payload) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }

    /// Encoded bytes of a built request, or the bytes consumed by a decoded
    /// response.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Build a login request carrying `password`.
pub fn build_login_request(password: &str) -> Result<Packet, PacketError> {
    build_request(0, request::LOGIN, password)
}

/// Build a command request whose id follows `id`.
pub fn build_command_request(id: i32, body: &str) -> Result<Packet, PacketError> {
    build_request(id, request::COMMAND, body)
}

/// Decode the frame at the start of `data` as a login response. Bytes past
/// the end of the frame are returned alongside it.
pub fn decode_login_response(data: &[u8]) -> Result<(Packet, &[u8]), PacketError> {
    decode_response(data, response::LOGIN)
}

/// Decode the frame at the start of `data` as a command response. Bytes past
/// the end of the frame are returned alongside it.
pub fn decode_command_response(data: &[u8]) -> Result<(Packet, &[u8]), PacketError> {
    decode_response(data, response::COMMAND)
}

/// Resolve the type code of `packet` against its direction.
///
/// Never fails: codes outside the documented set are reported as
/// [`Class::Unknown`] so callers can decide how strict to be.
pub fn classify(packet: &Packet) -> Metadata {
    let class = match packet.direction {
        Direction::Request => match packet.kind_code {
            request::LOGIN => Class::Login,
            request::COMMAND => Class::Command,
            _ => Class::Unknown,
        },
        Direction::Response if packet.request_id == ID_INVALID => Class::Invalid,
        Direction::Response => match packet.kind_code {
            response::LOGIN => Class::Login,
            response::COMMAND => Class::Command,
            _ => Class::Unknown,
        },
    };

    Metadata {
        class,
        payload_max: packet.direction.payload_max(),
    }
}

/// Check the structural invariants of `packet`.
///
/// The type code is only enforced for requests: servers routinely answer with
/// codes outside the documented set, so responses go through [`classify`]
/// instead.
pub fn verify(packet: &Packet, expected_code: i32) -> Result<(), PacketError> {
    let Metadata { payload_max, .. } = classify(packet);
    let length_max = LENGTH_MIN + payload_max as i32;

    if packet.declared_length < LENGTH_MIN {
        return Err(PacketError::LengthTooSmall(packet.declared_length));
    }

    if packet.declared_length > length_max {
        return Err(PacketError::LengthTooLarge {
            length: packet.declared_length,
            max: length_max,
        });
    }

    if packet.direction == Direction::Request && packet.kind_code != expected_code {
        return Err(PacketError::TypeMismatch {
            expected: expected_code,
            actual: packet.kind_code,
        });
    }

    let actual = LENGTH_MIN + packet.payload.len() as i32;
    if actual != packet.declared_length {
        return Err(PacketError::PayloadLengthMismatch {
            declared: packet.declared_length,
            actual,
        });
    }

    Ok(())
}

/// Id to use for the request following `seed`.
///
/// A seed that is not positive, or whose successor would overflow, is
/// replaced by a fresh clock-derived id. Ids only correlate requests with
/// responses; they carry no security meaning.
pub fn next_id(seed: i32) -> i32 {
    match seed.checked_add(1) {
        Some(next) if seed > 0 => next,
        _ => fresh_id(),
    }
}

/// Encode a raw frame. The declared length is derived from `payload`.
pub fn encode_frame(request_id: i32, kind_code: i32, payload: &[u8]) -> Vec<u8> {
    let declared_length = LENGTH_MIN + payload.len() as i32;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + declared_length as usize);
    buf.extend_from_slice(&declared_length.to_le_bytes());
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&kind_code.to_le_bytes());
    buf.extend_from_slice(payload);

    // Terminator and pad
    buf.extend_from_slice(&[0, 0]);
    buf
}

fn build_request(seed: i32, code: i32, body: &str) -> Result<Packet, PacketError> {
    let payload = body.as_bytes();
    if payload.len() > request::PAYLOAD_MAX {
        return Err(PacketError::PayloadTooLarge {
            len: payload.len(),
            max: request::PAYLOAD_MAX,
        });
    }
    if payload.contains(&0) {
        return Err(PacketError::PayloadContainsNul);
    }

    let mut packet = Packet {
        declared_length: LENGTH_MIN + payload.len() as i32,
        request_id: next_id(seed),
        kind_code: code,
        payload: payload.to_vec(),
        direction: Direction::Request,
        raw: Vec::new(),
    };

    verify(&packet, code).map_err(|err| match err {
        PacketError::LengthTooSmall(_) => PacketError::PayloadTooSmall,
        PacketError::LengthTooLarge { .. } => PacketError::PayloadTooLarge {
            len: payload.len(),
            max: request::PAYLOAD_MAX,
        },
        err => err,
    })?;

    packet.raw = encode_frame(packet.request_id, packet.kind_code, &packet.payload);
    Ok(packet)
}

fn decode_response(data: &[u8], expected_code: i32) -> Result<(Packet, &[u8]), PacketError> {
    if data.len() < HEADER_LEN {
        return Err(PacketError::Incomplete {
            needed: HEADER_LEN,
            available: data.len(),
        });
    }

    let mut packet = Packet {
        declared_length: read_i32(&data[0..4]),
        request_id: read_i32(&data[4..8]),
        kind_code: read_i32(&data[8..12]),
        payload: Vec::new(),
        direction: Direction::Response,
        raw: Vec::new(),
    };

    // Bounds first, so a garbage length never drives the slicing below
    let length_max = LENGTH_MIN + response::PAYLOAD_MAX as i32;
    if packet.declared_length < LENGTH_MIN {
        return Err(PacketError::LengthTooSmall(packet.declared_length));
    }
    if packet.declared_length > length_max {
        return Err(PacketError::LengthTooLarge {
            length: packet.declared_length,
            max: length_max,
        });
    }

    let frame_end = LENGTH_PREFIX + packet.declared_length as usize;
    if data.len() < frame_end {
        return Err(PacketError::Incomplete {
            needed: frame_end,
            available: data.len(),
        });
    }

    let body = &data[HEADER_LEN..frame_end];
    let payload = match body.iter().position(|byte| *byte == 0) {
        Some(terminator) => &body[..terminator],
        None => body,
    };

    let consumed_length = LENGTH_MIN + payload.len() as i32;
    if consumed_length != packet.declared_length {
        return Err(PacketError::PayloadLengthMismatch {
            declared: packet.declared_length,
            actual: consumed_length,
        });
    }

    packet.payload = payload.to_vec();
    packet.raw = data[..frame_end].to_vec();
    verify(&packet, expected_code)?;

    Ok((packet, &data[frame_end..]))
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    i32::from_le_bytes(buf)
}

fn fresh_id() -> i32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();

    // Kept small so that incrementing never gets near i32::MAX
    ((nanos / 100_000) % 99_999) as i32 + 1
}
