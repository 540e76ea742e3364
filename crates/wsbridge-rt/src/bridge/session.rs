//! Bridge session state machine.
//!
//! A [`BridgeSession`] couples one upgraded WebSocket transport with one TCP
//! transport. It owns the receive buffer, decodes client frames, relays data
//! payloads to TCP and wraps TCP bytes in binary frames for the client.
//!
//! The session does no I/O scheduling of its own: the relay feeds it one
//! event at a time (`on_*` methods) from a single thread. Every path that
//! ends the session goes through [`BridgeSession::close`], which makes the
//! transition to `Closed` exactly once.
//!
//! ```text
//! Connecting --tcp connected--> Open
//!     |                           |
//!     +----- close signal --------+--> Closing --> Closed
//! ```

use std::io;

use tracing::debug;

use crate::ws::buffer::RecvBuffer;
use crate::ws::close::{close_frame, WsCloseCode};
use crate::ws::frame::{decode_frames, encode_frame, WsFrame, WsOpcode};

/// One side of a session.
pub trait Transport {
    /// Write all of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Release the transport. The session calls this at most once.
    fn destroy(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// WebSocket upgraded, backend connect in flight.
    Connecting,
    /// Both transports live.
    Open,
    /// Teardown in progress.
    Closing,
    /// Terminal. Both transports released.
    Closed,
}

pub struct BridgeSession<W: Transport, T: Transport> {
    state: SessionState,
    ws: W,
    tcp: Option<T>,
    /// Data payloads decoded before the backend connection completed.
    pending: Vec<u8>,
    recv: RecvBuffer,
    max_payload: u64,
}

impl<W: Transport, T: Transport> BridgeSession<W, T> {
    pub fn new(ws: W, max_payload: u64) -> Self {
        Self {
            state: SessionState::Connecting,
            ws,
            tcp: None,
            pending: Vec::new(),
            recv: RecvBuffer::new(),
            max_payload,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Bytes buffered from the client that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.recv.len()
    }

    /// The backend connection completed. Anything decoded while connecting
    /// is written first, in order.
    pub fn on_tcp_connected(&mut self, mut tcp: T) {
        if self.state != SessionState::Connecting {
            // Session ended while the connect was in flight.
            tcp.destroy();
            return;
        }

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            if let Err(e) = tcp.send(&pending) {
                self.tcp = Some(tcp);
                self.on_tcp_error(&e);
                return;
            }
        }
        self.tcp = Some(tcp);
        self.state = SessionState::Open;
        debug!("backend connected");
    }

    /// Raw bytes from the backend, forwarded as one binary frame.
    pub fn on_tcp_data(&mut self, bytes: &[u8]) {
        if self.state != SessionState::Open {
            return;
        }
        if let Err(e) = self.ws.send(&encode_frame(bytes, WsOpcode::Binary)) {
            self.on_ws_error(&e);
        }
    }

    /// Backend closed its side cleanly.
    pub fn on_tcp_end(&mut self) {
        debug!("backend closed");
        self.close(Some((WsCloseCode::NORMAL, "TCP closed")));
    }

    /// Backend connect, read or write failed.
    pub fn on_tcp_error(&mut self, err: &io::Error) {
        debug!(error = %err, "backend error");
        self.close(Some((WsCloseCode::INTERNAL_ERROR, "TCP error")));
    }

    /// Bytes from the client: buffer them and handle every complete frame.
    pub fn on_ws_data(&mut self, bytes: &[u8]) {
        if self.is_closed() {
            return;
        }
        self.recv.extend(bytes);

        let decoded = decode_frames(self.recv.unparsed(), self.max_payload);
        self.recv.consume(decoded.consumed);

        for frame in decoded.frames {
            self.dispatch(frame);
            if self.is_closed() {
                return;
            }
        }

        if let Some(err) = decoded.error {
            debug!(error = %err, "undecodable frame from client");
            self.close(Some((err.close_code(), "protocol violation")));
        }
    }

    /// Client closed the connection without a close frame.
    pub fn on_ws_end(&mut self) {
        debug!("client disconnected");
        self.close(None);
    }

    /// Client socket failed; no frame can be sent back.
    pub fn on_ws_error(&mut self, err: &io::Error) {
        debug!(error = %err, "client transport error");
        self.close(None);
    }

    fn dispatch(&mut self, frame: WsFrame) {
        match frame.opcode {
            WsOpcode::Close => {
                debug!("client sent close");
                self.close(Some((WsCloseCode::NORMAL, "")));
            }
            WsOpcode::Ping => {
                if let Err(e) = self.ws.send(&encode_frame(&frame.payload, WsOpcode::Pong)) {
                    self.on_ws_error(&e);
                }
            }
            WsOpcode::Pong => {}
            // Fragments are not reassembled; each payload goes out as it arrives.
            WsOpcode::Text | WsOpcode::Binary | WsOpcode::Continuation => {
                self.forward_to_tcp(&frame.payload);
            }
        }
    }

    fn forward_to_tcp(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        match self.tcp.as_mut() {
            Some(tcp) => {
                if let Err(e) = tcp.send(payload) {
                    self.on_tcp_error(&e);
                }
            }
            None => self.pending.extend_from_slice(payload),
        }
    }

    /// Tear the session down. Sends `farewell` as a close frame when given,
    /// swallowing write failures, then destroys both transports. A second
    /// call is a no-op.
    pub fn close(&mut self, farewell: Option<(u16, &str)>) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;

        if let Some((code, reason)) = farewell {
            let _ = self.ws.send(&close_frame(code, reason));
        }
        if let Some(mut tcp) = self.tcp.take() {
            tcp.destroy();
        }
        self.ws.destroy();
        self.pending.clear();

        self.state = SessionState::Closed;
    }
}
