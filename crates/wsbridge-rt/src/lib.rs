//! WebSocket to TCP bridge runtime.
//!
//! Lets browser clients, which can only speak WebSocket, talk to a raw TCP
//! service. Each accepted WebSocket connection gets its own backend TCP
//! connection; decoded frame payloads go to the backend and backend bytes
//! come back as binary frames. The bytes themselves are never interpreted.
//!
//! ## Modules
//!
//! - [`ws`]: RFC 6455 frame codec, receive buffer, handshake, close frames
//! - [`bridge`]: per-client session state machine and its thread runtime
//! - [`stream`]: plain/TLS client stream and its read/write halves
//! - [`server`]: listener with port retry, status page, panic isolation
//! - [`config`]: configuration values and TLS material loading
//! - [`error`]: error types

pub mod bridge;
pub mod config;
pub mod error;
pub mod server;
pub mod stream;
pub mod ws;

pub use bridge::{BridgeSession, SessionState, Transport};
pub use config::{BridgeConfig, TlsConfig};
pub use error::{BridgeError, FrameError};
pub use server::BridgeServer;
