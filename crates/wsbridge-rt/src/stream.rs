//! Client stream abstraction for plain TCP and TLS WebSocket connections.
//!
//! [`WsStream`] is what the listener hands to the handshake. Once a
//! connection is upgraded it is split into a [`WsReader`] and a [`WsWriter`]
//! so the session can read and write from different threads.
//!
//! A plain `TcpStream` splits with `try_clone()`. A rustls `StreamOwned`
//! cannot be cloned, so both TLS halves share it behind a mutex and the
//! reader polls with a short read timeout, releasing the lock between polls
//! so writers get a turn.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::{ServerConnection, StreamOwned};

/// Read timeout of the TLS reader half; bounds how long a writer waits for
/// the shared stream.
pub const TLS_POLL_INTERVAL: Duration = Duration::from_millis(100);

type TlsStream = StreamOwned<ServerConnection, TcpStream>;

/// A client connection, plain or TLS-wrapped.
pub enum WsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl WsStream {
    fn socket(&self) -> &TcpStream {
        match self {
            WsStream::Plain(s) => s,
            WsStream::Tls(s) => s.get_ref(),
        }
    }

    /// Set the read timeout on the underlying socket. TLS reads inherit it.
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.socket().set_read_timeout(dur)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, WsStream::Tls(_))
    }

    /// Best-effort close of the connection (TLS close_notify, then socket shutdown).
    pub fn shutdown(&mut self) {
        if let WsStream::Tls(s) = self {
            s.conn.send_close_notify();
            let _ = s.flush();
        }
        let _ = self.socket().shutdown(Shutdown::Both);
    }

    /// Split into independently usable read and write halves.
    pub fn into_split(self) -> io::Result<(WsReader, WsWriter)> {
        match self {
            WsStream::Plain(s) => {
                s.set_read_timeout(None)?;
                let writer = s.try_clone()?;
                Ok((WsReader(Half::Plain(s)), WsWriter(Half::Plain(writer))))
            }
            WsStream::Tls(s) => {
                s.get_ref().set_read_timeout(Some(TLS_POLL_INTERVAL))?;
                let shared = Arc::new(Mutex::new(s));
                Ok((
                    WsReader(Half::Tls(Arc::clone(&shared))),
                    WsWriter(Half::Tls(shared)),
                ))
            }
        }
    }
}

impl Read for WsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            WsStream::Plain(s) => s.read(buf),
            WsStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for WsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WsStream::Plain(s) => s.write(buf),
            WsStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            WsStream::Plain(s) => s.flush(),
            WsStream::Tls(s) => s.flush(),
        }
    }
}

enum Half {
    Plain(TcpStream),
    Tls(Arc<Mutex<Box<TlsStream>>>),
}

/// Read half of an upgraded connection.
pub struct WsReader(Half);

impl Read for WsReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Half::Plain(s) => s.read(buf),
            Half::Tls(s) => s.lock().read(buf),
        }
    }
}

/// Write half of an upgraded connection.
pub struct WsWriter(Half);

impl WsWriter {
    /// Close the connection for both halves. The reader observes EOF or an
    /// error on its next read.
    pub fn shutdown(&mut self) {
        match &mut self.0 {
            Half::Plain(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Half::Tls(s) => {
                let mut s = s.lock();
                s.conn.send_close_notify();
                let _ = s.flush();
                let _ = s.get_ref().shutdown(Shutdown::Both);
            }
        }
    }
}

impl Write for WsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            Half::Plain(s) => s.write(buf),
            Half::Tls(s) => s.lock().write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // Hold the lock for the whole frame so TLS records are not split
        // around a reader poll.
        match &mut self.0 {
            Half::Plain(s) => s.write_all(buf),
            Half::Tls(s) => {
                let mut s = s.lock();
                s.write_all(buf)?;
                s.flush()
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            Half::Plain(s) => s.flush(),
            Half::Tls(s) => s.lock().flush(),
        }
    }
}

/// Whether a read error is just the poll timeout expiring.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
