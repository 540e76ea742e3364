//! WebSocket frame codec (RFC 6455 Section 5.2-5.3).
//!
//! Frames are the smallest unit of WebSocket communication. The decoder works
//! on whatever bytes a session has accumulated so far and never blocks: a
//! single transport read may hold zero, one, or many frames, or a frame cut
//! anywhere in its header or payload.
//!
//! - [`decode_frames`]: Extract every complete frame from a byte slice
//! - [`encode_frame`]: Build an unmasked, unfragmented server frame
//! - [`apply_mask`]: Symmetric XOR masking per RFC 6455 Section 5.3

use crate::error::FrameError;

/// Control frames carry at most this many payload bytes (RFC 6455 Section 5.5).
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Largest declared payload length that is still representable (2^53 - 1).
pub const MAX_SAFE_LENGTH: u64 = (1 << 53) - 1;

/// Default cap on a single frame payload (64 MiB) to keep a hostile length
/// from pinning memory while the rest of the payload never arrives.
pub const DEFAULT_MAX_PAYLOAD: u64 = 64 * 1024 * 1024;

/// WebSocket frame opcodes per RFC 6455 Section 5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsOpcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl WsOpcode {
    /// Parse a 4-bit opcode value into a `WsOpcode`.
    ///
    /// Reserved opcodes (0x3-0x7, 0xB-0xF) are rejected; the session answers
    /// them with close code 1002.
    pub fn from_u8(byte: u8) -> Result<WsOpcode, FrameError> {
        match byte {
            0x0 => Ok(WsOpcode::Continuation),
            0x1 => Ok(WsOpcode::Text),
            0x2 => Ok(WsOpcode::Binary),
            0x8 => Ok(WsOpcode::Close),
            0x9 => Ok(WsOpcode::Ping),
            0xA => Ok(WsOpcode::Pong),
            _ => Err(FrameError::ReservedOpcode(byte)),
        }
    }

    /// Control frames are close, ping and pong.
    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// A decoded WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    /// FIN bit -- `true` if this is the final fragment of a message.
    pub fin: bool,
    /// The frame opcode.
    pub opcode: WsOpcode,
    /// Whether the frame arrived masked (always true for conforming clients).
    pub masked: bool,
    /// The unmasked payload bytes.
    pub payload: Vec<u8>,
}

/// Result of one decode pass over the receive buffer.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Complete frames in arrival order.
    pub frames: Vec<WsFrame>,
    /// Bytes covered by `frames`; the caller drops exactly this many from
    /// the front of its buffer.
    pub consumed: usize,
    /// Set when decoding halted on a frame that can never be decoded. The
    /// offending bytes are not counted in `consumed`.
    pub error: Option<FrameError>,
}

/// Apply or remove the 4-byte XOR mask on a payload.
///
/// The operation is symmetric: applying the mask twice returns the original.
pub fn apply_mask(payload: &mut [u8], mask_key: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Extract as many complete frames from `buf` as are available.
///
/// Stops at the first incomplete frame (header, extended length, mask key,
/// or payload still missing bytes) or at the first frame that violates the
/// protocol. Payloads longer than `max_payload` are rejected as soon as
/// their length is known, without waiting for the payload itself.
pub fn decode_frames(buf: &[u8], max_payload: u64) -> Decoded {
    let mut decoded = Decoded::default();
    loop {
        match decode_one(&buf[decoded.consumed..], max_payload) {
            Ok(Some((frame, len))) => {
                decoded.frames.push(frame);
                decoded.consumed += len;
            }
            Ok(None) => break,
            Err(e) => {
                decoded.error = Some(e);
                break;
            }
        }
    }
    decoded
}

/// Decode the frame at the start of `buf`, returning it with its total
/// wire length, or `None` if more bytes are needed.
fn decode_one(buf: &[u8], max_payload: u64) -> Result<Option<(WsFrame, usize)>, FrameError> {
    // Byte 0: FIN(1) RSV(3) Opcode(4)
    // Byte 1: MASK(1) Payload-Length(7)
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = (buf[0] & 0x80) != 0;
    let rsv = (buf[0] >> 4) & 0x07;
    if rsv != 0 {
        return Err(FrameError::ReservedBits(rsv));
    }
    let opcode = WsOpcode::from_u8(buf[0] & 0x0F)?;

    let masked = (buf[1] & 0x80) != 0;
    let mut pos = 2;

    let declared: u64 = match buf[1] & 0x7F {
        126 => {
            let Some(ext) = buf.get(pos..pos + 2) else {
                return Ok(None);
            };
            pos += 2;
            u16::from_be_bytes([ext[0], ext[1]]) as u64
        }
        127 => {
            let Some(ext) = buf.get(pos..pos + 8) else {
                return Ok(None);
            };
            pos += 8;
            let mut be = [0u8; 8];
            be.copy_from_slice(ext);
            let len = u64::from_be_bytes(be);
            if len > MAX_SAFE_LENGTH {
                return Err(FrameError::LengthOverflow(len));
            }
            len
        }
        short => short as u64,
    };

    if opcode.is_control() && (!fin || declared > MAX_CONTROL_PAYLOAD) {
        return Err(FrameError::InvalidControl {
            opcode: opcode as u8,
            fin,
            len: declared,
        });
    }
    if declared > max_payload {
        return Err(FrameError::PayloadTooLarge {
            len: declared,
            max: max_payload,
        });
    }
    let len = usize::try_from(declared).map_err(|_| FrameError::PayloadTooLarge {
        len: declared,
        max: usize::MAX as u64,
    })?;

    // Masking key (4 bytes, present only if MASK bit is set)
    let mask_key = if masked {
        let Some(key) = buf.get(pos..pos + 4) else {
            return Ok(None);
        };
        pos += 4;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    if buf.len() - pos < len {
        return Ok(None);
    }
    let mut payload = buf[pos..pos + len].to_vec();
    if let Some(key) = mask_key {
        apply_mask(&mut payload, &key);
    }

    Ok(Some((
        WsFrame {
            fin,
            opcode,
            masked,
            payload,
        },
        pos + len,
    )))
}

/// Encode one server-to-client frame.
///
/// FIN is always set and the frame is never masked (RFC 6455 Section 5.1).
/// The length uses the shortest of the three encodings.
pub fn encode_frame(payload: &[u8], opcode: WsOpcode) -> Vec<u8> {
    let byte0 = 0x80 | (opcode as u8);
    let len = payload.len();

    let mut frame = Vec::with_capacity(len + 10);
    if len < 126 {
        frame.extend_from_slice(&[byte0, len as u8]);
    } else if len <= 0xFFFF {
        frame.extend_from_slice(&[byte0, 126]);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.extend_from_slice(&[byte0, 127]);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}
