//! Bridge sessions: one WebSocket client coupled to one backend TCP connection.

pub mod relay;
pub mod session;

pub use relay::run_session;
pub use session::{BridgeSession, SessionState, Transport};
