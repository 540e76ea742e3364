//! WebSocket protocol layer (RFC 6455 subset used by the bridge).
//!
//! - **Frame codec** (`frame`): incremental frame decoding and server frame encoding with XOR masking
//! - **Receive buffer** (`buffer`): accumulator for bytes not yet parsed into frames
//! - **Handshake** (`handshake`): request head parsing, upgrade negotiation, HTTP responses
//! - **Close** (`close`): close codes and close frame payloads

pub mod buffer;
pub mod close;
pub mod frame;
pub mod handshake;

pub use buffer::RecvBuffer;
pub use close::{build_close_payload, close_frame, parse_close_payload, WsCloseCode};
pub use frame::{apply_mask, decode_frames, encode_frame, Decoded, WsFrame, WsOpcode};
pub use handshake::{compute_accept_key, negotiate, read_request_head, Negotiation, RequestHead};
