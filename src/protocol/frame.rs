//! Fixed-size frame codec.
//!
//! Every frame is exactly 4096 bytes. The first 64 bytes hold the header,
//! all integers little-endian:
//!
//! ```text
//! offset  size  field
//!      0     8  nonce            (i64, random per outbound request)
//!      8    16  peer id          (guest UUID bytes)
//!     24     8  session id       (i64)
//!     32     4  is request       (i32, 0/1)
//!     36     4  is response      (i32, 0/1)
//!     40     4  needs response   (i32, 0/1)
//!     44     4  request length   (u32)
//!     48     4  response length  (u32)
//!     52     4  command id       (u32)
//!     56     4  sub-command      (u32)
//!     60     4  reserved         (u32)
//! ```
//!
//! The payload starts at byte 64 and is NUL-padded up to the frame size.
//! Declared lengths exclude the NUL terminator.

use thiserror::Error;

/// Size of every frame on the wire.
pub const FRAME_SIZE: usize = 4096;

/// Size of the fixed header at the start of a frame.
pub const HEADER_SIZE: usize = 64;

/// Largest payload that fits behind the header.
pub const MAX_PAYLOAD: usize = FRAME_SIZE - HEADER_SIZE;

/// Session id carried by every frame this side originates.
pub const SESSION_ID: i64 = 10_000_000;

/// Sub-command carried by every request this side originates.
pub const SUB_COMMAND: u32 = 1;

/// Frame codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer handed to `decode` is not exactly one frame.
    #[error("Frame must be {} bytes, got {got}", FRAME_SIZE)]
    WrongSize { got: usize },

    /// The payload does not fit behind the header.
    #[error("Payload of {len} bytes exceeds maximum {} bytes", MAX_PAYLOAD)]
    PayloadTooLarge { len: usize },
}

/// Decoded 64-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub nonce: i64,
    pub peer_id: [u8; 16],
    pub session_id: i64,
    pub is_request: bool,
    pub is_response: bool,
    pub needs_response: bool,
    pub request_length: u32,
    pub response_length: u32,
    pub command_id: u32,
    pub sub_command: u32,
    pub reserved: u32,
}

impl FrameHeader {
    /// Header for a host-originated request with an empty payload.
    pub fn request(command_id: u32, needs_response: bool, peer_id: [u8; 16]) -> Self {
        Self {
            // Non-negative, like the peer's own nonces.
            nonce: rand::random::<i64>() & i64::MAX,
            peer_id,
            session_id: SESSION_ID,
            is_request: true,
            needs_response,
            command_id,
            sub_command: SUB_COMMAND,
            ..Self::default()
        }
    }

    /// Header answering this request with a payload of `len` bytes.
    ///
    /// Nonce, peer id, session, command and sub-command are carried over.
    pub fn reply(&self, len: usize) -> Self {
        Self {
            is_request: false,
            is_response: true,
            request_length: 0,
            response_length: len as u32,
            ..*self
        }
    }

    /// Declared length of the payload that matters for this frame's kind.
    pub fn payload_len(&self) -> usize {
        if self.is_request {
            self.request_length as usize
        } else if self.is_response {
            self.response_length as usize
        } else {
            0
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.nonce.to_le_bytes());
        buf[8..24].copy_from_slice(&self.peer_id);
        buf[24..32].copy_from_slice(&self.session_id.to_le_bytes());
        buf[32..36].copy_from_slice(&(self.is_request as i32).to_le_bytes());
        buf[36..40].copy_from_slice(&(self.is_response as i32).to_le_bytes());
        buf[40..44].copy_from_slice(&(self.needs_response as i32).to_le_bytes());
        buf[44..48].copy_from_slice(&self.request_length.to_le_bytes());
        buf[48..52].copy_from_slice(&self.response_length.to_le_bytes());
        buf[52..56].copy_from_slice(&self.command_id.to_le_bytes());
        buf[56..60].copy_from_slice(&self.sub_command.to_le_bytes());
        buf[60..64].copy_from_slice(&self.reserved.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let i64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            i64::from_le_bytes(raw)
        };
        let mut peer_id = [0u8; 16];
        peer_id.copy_from_slice(&buf[8..24]);

        Self {
            nonce: i64_at(0),
            peer_id,
            session_id: i64_at(24),
            is_request: u32_at(32) != 0,
            is_response: u32_at(36) != 0,
            needs_response: u32_at(40) != 0,
            request_length: u32_at(44),
            response_length: u32_at(48),
            command_id: u32_at(52),
            sub_command: u32_at(56),
            reserved: u32_at(60),
        }
    }
}

/// Encode a header and payload into one full frame.
///
/// The header is written as given; callers keep its length fields in
/// agreement with `payload`.
///
/// # Errors
///
/// Returns `FrameError::PayloadTooLarge` if `payload` exceeds `MAX_PAYLOAD`.
pub fn encode(header: &FrameHeader, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge { len: payload.len() });
    }

    let mut buf = vec![0u8; FRAME_SIZE];
    header.write_to(&mut buf[..HEADER_SIZE]);
    buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    Ok(buf)
}

/// Decode one full frame into its header and payload.
///
/// The payload slice spans the declared length of the frame's kind,
/// clamped to the frame boundary.
///
/// # Errors
///
/// Returns `FrameError::WrongSize` unless `buf` is exactly `FRAME_SIZE` bytes.
pub fn decode(buf: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
    if buf.len() != FRAME_SIZE {
        return Err(FrameError::WrongSize { got: buf.len() });
    }

    let header = FrameHeader::read_from(&buf[..HEADER_SIZE]);
    let len = header.payload_len().min(MAX_PAYLOAD);
    Ok((header, &buf[HEADER_SIZE..HEADER_SIZE + len]))
}
