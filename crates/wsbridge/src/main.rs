//! The `wsbridge` command.
//!
//! Listens for WebSocket clients on `/ws` and relays each one to its own TCP
//! connection to the configured backend. Every option can also come from the
//! environment:
//!
//! - `PORT`, `HOST` - listen address (default `0.0.0.0:3000`)
//! - `TARGET_HOST`, `TARGET_PORT` - backend (default `127.0.0.1:5555`)
//! - `SSL_CERT`, `SSL_KEY`, `SSL_CA` - PEM files; TLS is on when cert and key are both set
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wsbridge_rt::config::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_PORT_RETRIES, DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT,
};
use wsbridge_rt::ws::frame::DEFAULT_MAX_PAYLOAD;
use wsbridge_rt::{BridgeConfig, BridgeServer, TlsConfig};

#[derive(Parser, Debug)]
#[command(name = "wsbridge", version, about = "WebSocket to TCP bridge")]
struct Cli {
    /// Port to listen on; the next free port is used if it is taken
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT, value_parser = port_or(DEFAULT_PORT))]
    port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST, value_parser = text_or(DEFAULT_HOST))]
    host: String,

    /// Backend host every session connects to
    #[arg(
        long = "target-host",
        env = "TARGET_HOST",
        default_value = DEFAULT_TARGET_HOST,
        value_parser = text_or(DEFAULT_TARGET_HOST)
    )]
    target_host: String,

    /// Backend port
    #[arg(
        long = "target-port",
        env = "TARGET_PORT",
        default_value_t = DEFAULT_TARGET_PORT,
        value_parser = port_or(DEFAULT_TARGET_PORT)
    )]
    target_port: u16,

    /// Certificate chain (PEM)
    #[arg(long = "ssl-cert", env = "SSL_CERT")]
    ssl_cert: Option<String>,

    /// Private key (PEM)
    #[arg(long = "ssl-key", env = "SSL_KEY")]
    ssl_key: Option<String>,

    /// Extra CA certificates appended to the served chain (PEM)
    #[arg(long = "ssl-ca", env = "SSL_CA")]
    ssl_ca: Option<String>,

    /// How many successive ports to try when the port is in use
    #[arg(long = "port-retries", default_value_t = DEFAULT_PORT_RETRIES)]
    port_retries: u32,

    /// Largest frame payload accepted from a client, in bytes
    #[arg(long = "max-payload", default_value_t = DEFAULT_MAX_PAYLOAD)]
    max_payload: u64,
}

// Deployments export these variables empty to mean "use the default"; clap
// hands the empty string to the parser, so map it back here.
fn port_or(default: u16) -> impl Fn(&str) -> Result<u16, String> + Clone + Send + Sync + 'static {
    move |value: &str| {
        if value.is_empty() {
            Ok(default)
        } else {
            value.parse().map_err(|e| format!("{e}"))
        }
    }
}

fn text_or(
    default: &'static str,
) -> impl Fn(&str) -> Result<String, String> + Clone + Send + Sync + 'static {
    move |value: &str| Ok(if value.is_empty() { default } else { value }.to_string())
}

impl Cli {
    fn into_config(self) -> BridgeConfig {
        // An empty variable counts as unset.
        let non_empty = |p: Option<String>| p.filter(|p| !p.is_empty()).map(PathBuf::from);

        let tls = match (non_empty(self.ssl_cert), non_empty(self.ssl_key)) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
                ca_path: non_empty(self.ssl_ca),
            }),
            _ => None,
        };

        BridgeConfig {
            host: self.host,
            port: self.port,
            target_host: self.target_host,
            target_port: self.target_port,
            tls,
            port_retries: self.port_retries,
            max_payload: self.max_payload,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config();

    let server = match BridgeServer::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let config = server.config();
    match server.local_addr() {
        Ok(addr) => info!(
            "listening on {}://{addr}/ws -> tcp://{}",
            config.scheme(),
            config.target_addr()
        ),
        Err(e) => info!(error = %e, "listening (address unavailable)"),
    }

    server.run();
}
