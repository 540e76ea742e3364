//! Error types for the bridge runtime.

use crate::ws::close::WsCloseCode;

/// A frame that can never be decoded. Decoding halts in front of it and the
/// session closes with [`FrameError::close_code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// 64-bit length above 2^53 - 1.
    #[error("declared payload length {0} is not representable")]
    LengthOverflow(u64),

    /// Payload longer than the configured per-frame limit.
    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge { len: u64, max: u64 },

    /// Opcode 0x3-0x7 or 0xB-0xF.
    #[error("reserved opcode: 0x{0:X}")]
    ReservedOpcode(u8),

    /// Close, ping or pong with FIN clear or more than 125 payload bytes.
    #[error("invalid control frame 0x{opcode:X} (fin={fin}, len={len})")]
    InvalidControl { opcode: u8, fin: bool, len: u64 },

    /// RSV1-3 set without a negotiated extension.
    #[error("non-zero RSV bits (0b{0:03b}) without negotiated extensions")]
    ReservedBits(u8),
}

impl FrameError {
    /// Close status code sent to the client for this violation.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::PayloadTooLarge { .. } => WsCloseCode::MESSAGE_TOO_BIG,
            _ => WsCloseCode::PROTOCOL_ERROR,
        }
    }
}

/// Errors raised while starting the bridge or serving one connection.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// Bad or unreadable configuration (TLS material, addresses).
    #[error("config error: {0}")]
    Config(String),

    /// Every port from `port` upward was in use.
    #[error("could not bind {host}:{port}: address in use after {attempts} attempts")]
    AddrInUse { host: String, port: u16, attempts: u32 },

    /// The HTTP request head could not be read or parsed.
    #[error("handshake error: {0}")]
    Handshake(String),
}
