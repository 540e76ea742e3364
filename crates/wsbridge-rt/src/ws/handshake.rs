//! WebSocket HTTP upgrade handshake (RFC 6455 Section 4.2).
//!
//! Reads the HTTP request head, decides what to do with it, and writes the
//! matching response. Negotiation itself is pure; only the `read_*` and
//! `write_*` functions touch a stream.
//!
//! - [`read_request_head`]: Read and parse the request head from a raw stream
//! - [`negotiate`]: Classify a request (status page, upgrade, 404, 426, drop)
//! - [`compute_accept_key`]: SHA-1 + Base64 computation per RFC 6455 Section 4.2.2
//! - [`write_upgrade_response`]: `101 Switching Protocols`
//! - [`write_not_found`], [`write_upgrade_required`], [`write_status_page`]

use std::io::{self, Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

use crate::error::BridgeError;

/// RFC 6455 magic GUID concatenated with the client key for Sec-WebSocket-Accept.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only path that accepts upgrades.
pub const UPGRADE_PATH: &str = "/ws";

/// Upper bound on the request line plus headers.
const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Compute the `Sec-WebSocket-Accept` value per RFC 6455 Section 4.2.2.
///
/// Concatenates `client_key` + [`WS_GUID`], SHA-1 hashes, then Base64 encodes.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A parsed HTTP request line and header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Request target as sent, including any query string.
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse a request head. `raw` may include the terminating blank line.
    pub fn parse(raw: &[u8]) -> Result<RequestHead, BridgeError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| BridgeError::Handshake("request head is not valid UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            return Err(BridgeError::Handshake(format!(
                "malformed request line: {request_line}"
            )));
        };
        if method.is_empty() || target.is_empty() {
            return Err(BridgeError::Handshake(format!(
                "malformed request line: {request_line}"
            )));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_string(), value.trim().to_string()))
                }
                None => {
                    return Err(BridgeError::Handshake(format!("malformed header: {line}")));
                }
            }
        }

        Ok(RequestHead {
            method: method.to_string(),
            target: target.to_string(),
            headers,
        })
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request target with the query string removed.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    /// True when the client asks to switch protocols: an `Upgrade` header is
    /// present and `Connection` lists the `upgrade` token.
    pub fn is_upgrade(&self) -> bool {
        let connection_upgrade = self.header("Connection").is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        connection_upgrade && self.header("Upgrade").is_some()
    }
}

/// Read the request head from `reader`.
///
/// Returns the parsed head and any bytes that arrived after the blank line;
/// those belong to the WebSocket stream and seed the session's buffer.
pub fn read_request_head<R: Read>(reader: &mut R) -> Result<(RequestHead, Vec<u8>), BridgeError> {
    let mut raw = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(BridgeError::Handshake(
                "connection closed before request head was complete".to_string(),
            ));
        }

        // Resume the terminator search a few bytes back in case it straddles reads.
        let search_from = raw.len().saturating_sub(3);
        raw.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&raw[search_from..]) {
            let head_len = search_from + end;
            let head = RequestHead::parse(&raw[..head_len])?;
            let leftover = raw.split_off(head_len);
            return Ok((head, leftover));
        }
        if raw.len() > MAX_HEAD_SIZE {
            return Err(BridgeError::Handshake(format!(
                "request head exceeds {MAX_HEAD_SIZE} bytes"
            )));
        }
    }
}

/// Offset just past the first `\r\n\r\n` in `buf`.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// What to do with an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// Ordinary HTTP request: answer with the status page.
    NotUpgrade,
    /// Upgrade to something other than `websocket`: drop without a response.
    Reject,
    /// Upgrade on a path other than [`UPGRADE_PATH`]: `404 Not Found`.
    NotFound,
    /// Missing key or unsupported version: `426 Upgrade Required`.
    UpgradeRequired,
    /// Valid WebSocket upgrade.
    Accept { accept_key: String },
}

/// Classify a request head.
///
/// Checks run in a fixed order: Upgrade value, then path, then key and
/// version.
pub fn negotiate(head: &RequestHead) -> Negotiation {
    if !head.is_upgrade() {
        return Negotiation::NotUpgrade;
    }

    match head.header("Upgrade") {
        Some(v) if v.eq_ignore_ascii_case("websocket") => {}
        _ => return Negotiation::Reject,
    }

    if head.path() != UPGRADE_PATH {
        return Negotiation::NotFound;
    }

    let key = head.header("Sec-WebSocket-Key").filter(|k| !k.is_empty());
    let version = head.header("Sec-WebSocket-Version");
    match (key, version) {
        (Some(key), Some("13")) => Negotiation::Accept {
            accept_key: compute_accept_key(key),
        },
        _ => Negotiation::UpgradeRequired,
    }
}

/// Write the `101 Switching Protocols` response to the stream.
pub fn write_upgrade_response<W: Write>(stream: &mut W, accept_key: &str) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key
    )?;
    stream.flush()
}

/// Write a bare `404 Not Found` for upgrades on an unknown path.
pub fn write_not_found<W: Write>(stream: &mut W) -> io::Result<()> {
    stream.write_all(b"HTTP/1.1 404 Not Found\r\n\r\n")?;
    stream.flush()
}

/// Write `426 Upgrade Required` naming the supported protocol version.
pub fn write_upgrade_required<W: Write>(stream: &mut W) -> io::Result<()> {
    stream.write_all(b"HTTP/1.1 426 Upgrade Required\r\nSec-WebSocket-Version: 13\r\n\r\n")?;
    stream.flush()
}

/// Body of the status page served on non-upgrade requests.
pub fn status_body(tls: bool) -> &'static str {
    if tls {
        "WebSocket bridge (TLS) is running. Connect via wss://host:PORT/ws"
    } else {
        "WebSocket bridge is running. Connect via ws://host:PORT/ws"
    }
}

/// Write the plain-text `200 OK` status page.
pub fn write_status_page<W: Write>(stream: &mut W, tls: bool) -> io::Result<()> {
    let body = status_body(tls);
    write!(
        stream,
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn upgrade_request(path: &str, extra: &[(&str, &str)]) -> RequestHead {
        let mut headers = vec![
            ("Host".to_string(), "localhost:3000".to_string()),
            ("Upgrade".to_string(), "websocket".to_string()),
            ("Connection".to_string(), "keep-alive, Upgrade".to_string()),
            ("Sec-WebSocket-Key".to_string(), RFC_KEY.to_string()),
            ("Sec-WebSocket-Version".to_string(), "13".to_string()),
        ];
        for (name, value) in extra {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            if !value.is_empty() {
                headers.push((name.to_string(), value.to_string()));
            }
        }
        RequestHead {
            method: "GET".to_string(),
            target: path.to_string(),
            headers,
        }
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(compute_accept_key(RFC_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_negotiate_valid_upgrade() {
        let head = upgrade_request("/ws", &[]);
        assert_eq!(
            negotiate(&head),
            Negotiation::Accept {
                accept_key: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".to_string()
            }
        );
    }

    #[test]
    fn test_negotiate_ignores_query_and_upgrade_case() {
        let head = upgrade_request("/ws?room=7", &[("Upgrade", "WebSocket")]);
        assert!(matches!(negotiate(&head), Negotiation::Accept { .. }));
    }

    #[test]
    fn test_negotiate_plain_request() {
        let head = RequestHead {
            method: "GET".to_string(),
            target: "/".to_string(),
            headers: vec![("Host".to_string(), "example.com".to_string())],
        };
        assert_eq!(negotiate(&head), Negotiation::NotUpgrade);
    }

    #[test]
    fn test_negotiate_upgrade_without_connection_token() {
        let head = upgrade_request("/ws", &[("Connection", "keep-alive")]);
        assert_eq!(negotiate(&head), Negotiation::NotUpgrade);
    }

    #[test]
    fn test_negotiate_other_protocol_rejected() {
        let head = upgrade_request("/ws", &[("Upgrade", "h2c")]);
        assert_eq!(negotiate(&head), Negotiation::Reject);
    }

    #[test]
    fn test_negotiate_unknown_path() {
        let head = upgrade_request("/socket", &[]);
        assert_eq!(negotiate(&head), Negotiation::NotFound);
    }

    #[test]
    fn test_negotiate_wrong_version() {
        let head = upgrade_request("/ws", &[("Sec-WebSocket-Version", "8")]);
        assert_eq!(negotiate(&head), Negotiation::UpgradeRequired);
    }

    #[test]
    fn test_negotiate_missing_key() {
        let head = upgrade_request("/ws", &[("Sec-WebSocket-Key", "")]);
        assert_eq!(negotiate(&head), Negotiation::UpgradeRequired);
    }

    #[test]
    fn test_path_checked_before_version() {
        let head = upgrade_request("/other", &[("Sec-WebSocket-Version", "8")]);
        assert_eq!(negotiate(&head), Negotiation::NotFound);
    }

    #[test]
    fn test_parse_request_head() {
        let raw = b"GET /ws?x=1 HTTP/1.1\r\nHost: a\r\nsec-websocket-key:  abc \r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/ws?x=1");
        assert_eq!(head.path(), "/ws");
        assert_eq!(head.header("Sec-WebSocket-Key"), Some("abc"));
        assert_eq!(head.header("host"), Some("a"));
    }

    #[test]
    fn test_parse_malformed_request_line() {
        assert!(RequestHead::parse(b"GARBAGE\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET /ws HTTP/1.1\r\nno colon here\r\n\r\n").is_err());
    }

    #[test]
    fn test_read_request_head_keeps_trailing_bytes() {
        let mut raw = b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0x81, 0x80, 1, 2, 3, 4]);
        let mut cursor = Cursor::new(raw);

        let (head, leftover) = read_request_head(&mut cursor).unwrap();
        assert_eq!(head.path(), "/ws");
        assert_eq!(leftover, vec![0x81, 0x80, 1, 2, 3, 4]);
    }

    #[test]
    fn test_read_request_head_split_terminator() {
        // Reader that hands out one byte per call so "\r\n\r\n" spans reads.
        struct Trickle(Cursor<Vec<u8>>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let len = buf.len().min(1);
                self.0.read(&mut buf[..len])
            }
        }

        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        let (head, leftover) = read_request_head(&mut Trickle(Cursor::new(raw))).unwrap();
        assert_eq!(head.target, "/");
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_read_request_head_eof() {
        let mut cursor = Cursor::new(b"GET / HTTP/1.1\r\nHost".to_vec());
        let err = read_request_head(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("closed before"), "got: {err}");
    }

    #[test]
    fn test_read_request_head_too_large() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_SIZE + 10));
        let err = read_request_head(&mut Cursor::new(raw)).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "got: {err}");
    }

    #[test]
    fn test_write_upgrade_response() {
        let mut out = Vec::new();
        write_upgrade_response(&mut out, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn test_write_rejections() {
        let mut out = Vec::new();
        write_not_found(&mut out).unwrap();
        assert_eq!(out, b"HTTP/1.1 404 Not Found\r\n\r\n");

        let mut out = Vec::new();
        write_upgrade_required(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[test]
    fn test_write_status_page() {
        let mut out = Vec::new();
        write_status_page(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(text.ends_with("Connect via ws://host:PORT/ws"));

        let mut out = Vec::new();
        write_status_page(&mut out, true).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("wss://host:PORT/ws"));
    }
}
