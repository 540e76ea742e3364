//! WebSocket close frames (RFC 6455 Section 5.5.1, 7).
//!
//! - [`build_close_payload`]: Build a close frame payload from code + reason
//! - [`parse_close_payload`]: Extract status code + reason from a close payload
//! - [`close_frame`]: Encode a complete close frame

use super::frame::{encode_frame, WsOpcode};

/// WebSocket close status codes the bridge emits or interprets.
pub struct WsCloseCode;

impl WsCloseCode {
    /// Normal closure (1000) -- client asked to close, or the backend ended cleanly.
    pub const NORMAL: u16 = 1000;
    /// Protocol error (1002) -- reserved opcode/bits or unrepresentable length.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// No status code present (1005). Never sent on the wire.
    pub const NO_STATUS: u16 = 1005;
    /// Message too big (1009) -- frame payload above the configured limit.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Internal error (1011) -- the backend connection failed.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Parse a close frame payload into (status_code, reason).
///
/// Payloads shorter than two bytes carry no status code and yield
/// `(1005, "")`. The reason is decoded lossily.
pub fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        (code, reason)
    } else {
        (WsCloseCode::NO_STATUS, String::new())
    }
}

/// Build a close frame payload from a status code and reason string.
///
/// The reason is cut to 123 bytes (on a char boundary) so the payload stays
/// within the 125-byte control frame limit.
pub fn build_close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut cut = reason.len().min(123);
    while !reason.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut payload = Vec::with_capacity(2 + cut);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..cut]);
    payload
}

/// Encode a complete close frame.
pub fn close_frame(code: u16, reason: &str) -> Vec<u8> {
    encode_frame(&build_close_payload(code, reason), WsOpcode::Close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::{decode_frames, DEFAULT_MAX_PAYLOAD};

    #[test]
    fn test_parse_close_normal() {
        let payload = vec![0x03, 0xE8, b'o', b'k'];
        let (code, reason) = parse_close_payload(&payload);
        assert_eq!(code, 1000);
        assert_eq!(reason, "ok");
    }

    #[test]
    fn test_parse_close_empty() {
        let (code, reason) = parse_close_payload(&[]);
        assert_eq!(code, 1005);
        assert_eq!(reason, "");
    }

    #[test]
    fn test_parse_close_code_only() {
        let (code, reason) = parse_close_payload(&[0x03, 0xF3]);
        assert_eq!(code, 1011);
        assert_eq!(reason, "");
    }

    #[test]
    fn test_build_close_payload() {
        let payload = build_close_payload(1011, "TCP error");
        assert_eq!(&payload[..2], &[0x03, 0xF3]);
        assert_eq!(&payload[2..], b"TCP error");
    }

    #[test]
    fn test_build_close_truncates_reason() {
        let long_reason = "x".repeat(200);
        let payload = build_close_payload(1000, &long_reason);
        assert_eq!(payload.len(), 125);
    }

    #[test]
    fn test_build_close_truncates_on_char_boundary() {
        // 'é' is two bytes; 62 of them = 124 bytes, so byte 123 splits one.
        let reason = "é".repeat(62);
        let payload = build_close_payload(1000, &reason);
        assert_eq!(payload.len(), 2 + 122);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }

    #[test]
    fn test_close_frame_decodes() {
        let out = close_frame(WsCloseCode::NORMAL, "TCP closed");

        let decoded = decode_frames(&out, DEFAULT_MAX_PAYLOAD);
        assert_eq!(decoded.frames.len(), 1);
        let frame = &decoded.frames[0];
        assert_eq!(frame.opcode, WsOpcode::Close);
        let (code, reason) = parse_close_payload(&frame.payload);
        assert_eq!(code, 1000);
        assert_eq!(reason, "TCP closed");
    }
}
