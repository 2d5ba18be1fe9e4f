//! RFC 6455 Frame Codec
//!
//! Stateless encode/decode of single WebSocket frames. Decoding peeks at the
//! buffer and only consumes bytes once a whole frame is available, so a partial
//! read simply yields `Ok(None)` and the caller reads more.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::shared::error::FrameError;

/// Default maximum frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Close code used when a Close frame carries no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint going away (server shutdown, client dropped).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation = 0x0,
    /// UTF-8 text
    Text = 0x1,
    /// Binary data
    Binary = 0x2,
    /// Close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }

    pub const fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Opcode::Continuation => "continuation",
            Opcode::Text => "text",
            Opcode::Binary => "binary",
            Opcode::Close => "close",
            Opcode::Ping => "ping",
            Opcode::Pong => "pong",
        }
    }
}

/// Which side of the connection is encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Client frames are masked, server frames are not.
    pub const fn masks_outgoing(self) -> bool {
        matches!(self, Role::Client)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// A single decoded frame. `payload` is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }
}

/// XOR `payload` with the repeating 4-byte key. Applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

fn generate_mask_key() -> [u8; 4] {
    rand::random()
}

/// Encode one frame. Client-originated frames (`mask == true`) get a fresh random key.
pub fn encode(opcode: Opcode, payload: &[u8], fin: bool, mask: bool) -> Bytes {
    let key = mask.then(generate_mask_key);
    encode_with_key(opcode, payload, fin, key).freeze()
}

/// Encode with an explicit mask key (`None` for unmasked server frames).
pub fn encode_with_key(opcode: Opcode, payload: &[u8], fin: bool, mask_key: Option<[u8; 4]>) -> BytesMut {
    let len = payload.len();
    let mut dst = BytesMut::with_capacity(len + 14);

    let fin_bit: u8 = if fin { 0x80 } else { 0x00 };
    dst.put_u8(fin_bit | opcode as u8);

    let mask_bit: u8 = if mask_key.is_some() { 0x80 } else { 0x00 };
    if len <= 125 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match mask_key {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(payload),
    }

    dst
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` when more bytes are needed. Errors are protocol
/// violations and must tear the connection down.
pub fn decode(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>, FrameError> {
    if src.len() < 2 {
        return Ok(None);
    }

    let first = src[0];
    let second = src[1];

    if first & 0x70 != 0 {
        return Err(FrameError::ReservedBitsSet);
    }

    let fin = first & 0x80 != 0;
    let opcode = Opcode::from_u8(first & 0x0F)?;
    let masked = second & 0x80 != 0;
    let len7 = second & 0x7F;

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControlFrame);
        }
        if len7 as usize > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlFrameTooLarge(len7 as usize));
        }
    }

    let (payload_len, mut header_len) = match len7 {
        126 => {
            if src.len() < 4 {
                return Ok(None);
            }
            (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
        }
        127 => {
            if src.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&src[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        n => (u64::from(n), 2),
    };

    if payload_len > max_payload as u64 {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let mask_key = if masked {
        if src.len() < header_len + 4 {
            return Ok(None);
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&src[header_len..header_len + 4]);
        header_len += 4;
        Some(key)
    } else {
        None
    };

    let payload_len = payload_len as usize;
    if src.len() < header_len + payload_len {
        src.reserve(header_len + payload_len - src.len());
        return Ok(None);
    }

    src.advance(header_len);
    let mut payload = src.split_to(payload_len);
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Some(Frame {
        fin,
        opcode,
        masked,
        payload: payload.freeze(),
    }))
}

/// Frames reaching a server must be masked; frames reaching a client must not.
pub fn check_mask(frame: &Frame, receiver: Role) -> Result<(), FrameError> {
    match (receiver, frame.masked) {
        (Role::Server, false) => Err(FrameError::UnmaskedClientFrame),
        (Role::Client, true) => Err(FrameError::MaskedServerFrame),
        _ => Ok(()),
    }
}

/// Build a Close payload: big-endian code followed by the reason (max 123 bytes).
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }

    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    payload
}

/// Parse a Close payload into (code, reason). An empty payload means 1005.
pub fn parse_close_payload(payload: &[u8]) -> Result<(u16, String), FrameError> {
    match payload.len() {
        0 => Ok((CLOSE_NO_STATUS, String::new())),
        1 => Err(FrameError::InvalidClosePayload),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
            Ok((code, reason))
        }
    }
}
