//! Listener: accepts HTTP connections and hands upgraded ones to a session.
//!
//! One OS thread per accepted connection. The thread optionally wraps the
//! socket in TLS, reads the request head, answers or upgrades it, and for
//! upgrades runs the bridge session until either side goes away. A panic on
//! that thread is caught and logged; the accept loop and other sessions
//! carry on.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ServerConfig, ServerConnection, StreamOwned};
use tracing::{debug, error, info_span, warn};

use crate::bridge::relay::run_session;
use crate::config::{join_host_port, BridgeConfig};
use crate::error::BridgeError;
use crate::stream::WsStream;
use crate::ws::handshake::{
    negotiate, read_request_head, write_not_found, write_status_page, write_upgrade_required,
    write_upgrade_response, Negotiation,
};

/// How long a client gets to send its request head.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between bind attempts when a port is taken.
const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct BridgeServer {
    listener: TcpListener,
    tls: Option<Arc<ServerConfig>>,
    config: Arc<BridgeConfig>,
}

impl BridgeServer {
    /// Load TLS material (if configured) and bind the listener.
    ///
    /// A port already in use is retried on the next port up to
    /// `config.port_retries` times; the port actually bound is reported by
    /// [`BridgeServer::local_addr`].
    pub fn bind(config: BridgeConfig) -> Result<Self, BridgeError> {
        let tls = config
            .tls
            .as_ref()
            .map(|t| t.build_server_config())
            .transpose()?;
        let listener = bind_with_retry(&config.host, config.port, config.port_retries)?;
        Ok(Self {
            listener,
            tls,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Accept connections forever, one thread each.
    pub fn run(self) {
        for conn in self.listener.incoming() {
            let tcp = match conn {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    continue;
                }
            };

            let tls = self.tls.clone();
            let config = Arc::clone(&self.config);
            let spawned = std::thread::Builder::new()
                .name("ws-conn".to_string())
                .spawn(move || handle_connection(tcp, tls, &config));
            if let Err(e) = spawned {
                error!(error = %e, "failed to spawn connection thread");
            }
        }
    }
}

fn bind_with_retry(host: &str, port: u16, retries: u32) -> Result<TcpListener, BridgeError> {
    let mut port = port;
    let mut attempts_left = retries;
    let first_port = port;

    loop {
        match TcpListener::bind(join_host_port(host, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempts_left > 0 => {
                let Some(next) = port.checked_add(1) else {
                    break;
                };
                warn!("port {port} in use, trying {next}");
                std::thread::sleep(BIND_RETRY_DELAY);
                port = next;
                attempts_left -= 1;
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => break,
            Err(e) => return Err(e.into()),
        }
    }

    Err(BridgeError::AddrInUse {
        host: host.to_string(),
        port: first_port,
        attempts: retries - attempts_left + 1,
    })
}

/// Connection thread entry point. Never panics past this frame.
fn handle_connection(tcp: TcpStream, tls: Option<Arc<ServerConfig>>, config: &BridgeConfig) {
    let peer = tcp
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let span = info_span!("session", %peer);
    let _guard = span.enter();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        serve_connection(tcp, tls, config)
    }));

    match result {
        Ok(Ok(())) => debug!("connection finished"),
        Ok(Err(e)) => debug!(error = %e, "connection ended with error"),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %msg, "connection handler panicked");
        }
    }
}

fn serve_connection(
    tcp: TcpStream,
    tls: Option<Arc<ServerConfig>>,
    config: &BridgeConfig,
) -> Result<(), BridgeError> {
    let _ = tcp.set_nodelay(true);

    let mut stream = match tls {
        Some(tls) => {
            let conn = ServerConnection::new(tls)?;
            WsStream::Tls(Box::new(StreamOwned::new(conn, tcp)))
        }
        None => WsStream::Plain(tcp),
    };
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let (head, leftover) = match read_request_head(&mut stream) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "dropping connection with unreadable request");
            stream.shutdown();
            return Ok(());
        }
    };

    match negotiate(&head) {
        Negotiation::NotUpgrade => {
            let tls = stream.is_tls();
            write_status_page(&mut stream, tls)?;
        }
        Negotiation::Reject => {
            debug!(upgrade = ?head.header("Upgrade"), "dropping non-websocket upgrade");
        }
        Negotiation::NotFound => {
            debug!(path = head.path(), "upgrade on unknown path");
            write_not_found(&mut stream)?;
        }
        Negotiation::UpgradeRequired => {
            debug!(
                version = ?head.header("Sec-WebSocket-Version"),
                "missing key or unsupported version"
            );
            write_upgrade_required(&mut stream)?;
        }
        Negotiation::Accept { accept_key } => {
            write_upgrade_response(&mut stream, &accept_key)?;
            debug!(backend = %config.target_addr(), "upgraded");
            run_session(stream, leftover, config.target_addr(), config.max_payload)?;
            return Ok(());
        }
    }

    stream.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_with_retry_skips_taken_port() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        match bind_with_retry("127.0.0.1", port, 5) {
            Ok(listener) => {
                let bound = listener.local_addr().unwrap().port();
                assert_ne!(bound, port);
                assert!(bound > port && bound <= port.saturating_add(5));
            }
            // Every port in the window may be taken on a busy host.
            Err(e) => assert!(matches!(e, BridgeError::AddrInUse { .. }), "got: {e}"),
        }
    }

    #[test]
    fn test_bind_with_retry_gives_up() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind_with_retry("127.0.0.1", port, 0).unwrap_err();
        match err {
            BridgeError::AddrInUse { port: p, attempts, .. } => {
                assert_eq!(p, port);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected AddrInUse, got {other}"),
        }
    }

    #[test]
    fn test_bind_reports_bad_tls_before_binding() {
        let config = BridgeConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            tls: Some(crate::config::TlsConfig {
                cert_path: "/nonexistent/cert.pem".into(),
                key_path: "/nonexistent/key.pem".into(),
                ca_path: None,
            }),
            ..BridgeConfig::default()
        };
        let err = BridgeServer::bind(config).err().unwrap();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
