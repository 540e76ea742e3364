//! Per-session runtime: thread-per-transport reader bridge.
//!
//! ## Architecture
//!
//! ```text
//! connection thread (owner)          ws-read thread        tcp thread
//!     |                                   |                    |
//!     +-- BridgeSession (all state)       +-- read client  --> |
//!     |                                   |                    +-- connect backend
//!     |<-------- SessionEvent channel ----+--------------------+-- read backend
//!     +-- on_* (decode, relay, close)
//!     +-- shutdown flag on exit
//! ```
//!
//! Reader threads never touch session state; they only turn readiness into
//! [`SessionEvent`]s. The owner handles one event at a time, so a read is
//! always fully appended to the receive buffer before the parse pass runs.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::session::{BridgeSession, Transport};
use crate::stream::{is_timeout, WsReader, WsStream, WsWriter};

/// Size of one transport read.
const READ_CHUNK: usize = 64 * 1024;

/// Readiness signals delivered to the session owner.
pub(crate) enum SessionEvent {
    WsData(Vec<u8>),
    WsEnd,
    WsError(io::Error),
    TcpConnected(TcpStream),
    TcpData(Vec<u8>),
    TcpEnd,
    TcpError(io::Error),
}

/// Client side of a live session. Destroying it gives up the writer, so a
/// second `destroy` (or the one run on drop) is a no-op.
pub struct WsTransport {
    writer: Option<WsWriter>,
}

impl WsTransport {
    pub fn new(writer: WsWriter) -> Self {
        Self {
            writer: Some(writer),
        }
    }
}

impl Transport for WsTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_all(bytes),
            None => Err(released()),
        }
    }

    fn destroy(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown();
        }
    }
}

// A session unwound by a panic never reaches `close`; shutting the sockets
// here is what wakes its reader threads.
impl Drop for WsTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Backend side of a live session.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.write_all(bytes),
            None => Err(released()),
        }
    }

    fn destroy(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn released() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport already destroyed")
}

/// Run one bridge session to completion on the calling thread.
///
/// `initial` holds client bytes that arrived together with the request head.
pub fn run_session(
    stream: WsStream,
    initial: Vec<u8>,
    target: String,
    max_payload: u64,
) -> io::Result<()> {
    let (reader, writer) = stream.into_split()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let (tx, rx) = crossbeam_channel::unbounded();

    spawn_ws_reader(reader, tx.clone(), Arc::clone(&shutdown))?;
    spawn_tcp_thread(target, tx, Arc::clone(&shutdown))?;

    let mut session = BridgeSession::new(WsTransport::new(writer), max_payload);
    if !initial.is_empty() {
        session.on_ws_data(&initial);
    }
    drive(&mut session, &rx);
    debug!(state = ?session.state(), buffered = session.buffered(), "session finished");

    shutdown.store(true, Ordering::SeqCst);
    release_unclaimed(&rx);
    Ok(())
}

/// Shut down a backend socket whose connect completed after the session
/// stopped reading events. Runs after the shutdown flag is set; the tcp
/// thread checks the flag after handing its socket over, so every socket is
/// either drained here or closed by that thread.
fn release_unclaimed(rx: &Receiver<SessionEvent>) {
    for event in rx.try_iter() {
        if let SessionEvent::TcpConnected(stream) = event {
            debug!("closing backend socket that connected after teardown");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Feed events into the session until it closes.
fn drive<W: Transport>(session: &mut BridgeSession<W, TcpTransport>, rx: &Receiver<SessionEvent>) {
    while !session.is_closed() {
        let Ok(event) = rx.recv() else {
            // Both reader threads are gone without a final event.
            session.close(None);
            break;
        };
        match event {
            SessionEvent::WsData(bytes) => session.on_ws_data(&bytes),
            SessionEvent::WsEnd => session.on_ws_end(),
            SessionEvent::WsError(e) => session.on_ws_error(&e),
            SessionEvent::TcpConnected(stream) => {
                session.on_tcp_connected(TcpTransport::new(stream))
            }
            SessionEvent::TcpData(bytes) => session.on_tcp_data(&bytes),
            SessionEvent::TcpEnd => session.on_tcp_end(),
            SessionEvent::TcpError(e) => session.on_tcp_error(&e),
        }
    }
}

fn spawn_ws_reader(
    mut reader: WsReader,
    tx: Sender<SessionEvent>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    std::thread::Builder::new()
        .name("ws-read".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let event = match reader.read(&mut buf) {
                    Ok(0) => SessionEvent::WsEnd,
                    Ok(n) => SessionEvent::WsData(buf[..n].to_vec()),
                    Err(e) if is_timeout(&e) => continue,
                    Err(e) => SessionEvent::WsError(e),
                };
                let last = !matches!(event, SessionEvent::WsData(_));
                if shutdown.load(Ordering::SeqCst) || tx.send(event).is_err() || last {
                    break;
                }
            }
        })?;
    Ok(())
}

fn spawn_tcp_thread(
    target: String,
    tx: Sender<SessionEvent>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    std::thread::Builder::new()
        .name("tcp-read".to_string())
        .spawn(move || {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            let mut stream = match TcpStream::connect(&target) {
                Ok(s) => s,
                Err(e) => {
                    warn!(%target, error = %e, "backend connect failed");
                    let _ = tx.send(SessionEvent::TcpError(e));
                    return;
                }
            };
            let _ = stream.set_nodelay(true);
            let writer = match stream.try_clone() {
                Ok(w) => w,
                Err(e) => {
                    let _ = tx.send(SessionEvent::TcpError(e));
                    return;
                }
            };
            if tx.send(SessionEvent::TcpConnected(writer)).is_err() {
                // Session already gone; dropping `stream` closes the socket.
                return;
            }
            if shutdown.load(Ordering::SeqCst) {
                // The owner may have drained the channel before our event landed.
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
            debug!(%target, "backend socket open");

            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let event = match stream.read(&mut buf) {
                    Ok(0) => SessionEvent::TcpEnd,
                    Ok(n) => SessionEvent::TcpData(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => SessionEvent::TcpError(e),
                };
                let last = !matches!(event, SessionEvent::TcpData(_));
                if shutdown.load(Ordering::SeqCst) || tx.send(event).is_err() || last {
                    break;
                }
            }
        })?;
    Ok(())
}
