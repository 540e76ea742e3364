//! Bridge configuration and TLS material loading.
//!
//! Configuration is read once at start-up and never reloaded.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::BridgeError;
use crate::ws::frame::DEFAULT_MAX_PAYLOAD;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_TARGET_HOST: &str = "127.0.0.1";
pub const DEFAULT_TARGET_PORT: u16 = 5555;
pub const DEFAULT_PORT_RETRIES: u32 = 20;

/// PEM files for a `wss://` listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Extra CA certificates appended to the served chain.
    pub ca_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Address the listener binds to.
    pub host: String,
    /// First port tried; later attempts count upward from here.
    pub port: u16,
    /// Backend every session connects to.
    pub target_host: String,
    pub target_port: u16,
    pub tls: Option<TlsConfig>,
    /// How many more ports to try when `port` is already in use.
    pub port_retries: u32,
    /// Largest frame payload accepted from a client.
    pub max_payload: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            target_host: DEFAULT_TARGET_HOST.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            tls: None,
            port_retries: DEFAULT_PORT_RETRIES,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl BridgeConfig {
    /// `host:port` of the backend, bracketing IPv6 literals.
    pub fn target_addr(&self) -> String {
        join_host_port(&self.target_host, self.target_port)
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "wss"
        } else {
            "ws"
        }
    }
}

pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl TlsConfig {
    /// Load the PEM material into a rustls server configuration.
    pub fn build_server_config(&self) -> Result<Arc<ServerConfig>, BridgeError> {
        let mut chain = load_certs(&self.cert_path)?;
        if let Some(ca_path) = &self.ca_path {
            chain.extend(load_certs(ca_path)?);
        }
        let key = load_private_key(&self.key_path)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
        Ok(Arc::new(config))
    }
}

fn open_pem(path: &Path) -> Result<BufReader<File>, BridgeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| BridgeError::Config(format!("cannot open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, BridgeError> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BridgeError::Config(format!("invalid PEM in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(BridgeError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, BridgeError> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BridgeError::Config(format!("invalid PEM in {}: {e}", path.display())))?
        .ok_or_else(|| BridgeError::Config(format!("no private key found in {}", path.display())))
}
