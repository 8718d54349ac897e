use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use ffmpeg_bus::description::DEFAULT_DESCRIPTION;

use crate::{media::bridge::DEFAULT_SAMPLE_QUEUE, signaling::session::SessionOptions};

#[derive(Parser, Debug, Clone)]
#[command(name = "tv-relay")]
#[command(about = "Relays one live broadcast to any number of WebRTC viewers")]
pub struct RelayConfig {
    /// Address for the HTTP server to listen on; a bare `:port` listens on
    /// every interface
    #[arg(long, env = "TV_RELAY_HTTP_LISTEN_ADDRESS", default_value = ":8080")]
    http_listen_address: String,

    /// Transcode pipeline description
    #[arg(long, env = "TV_RELAY_PIPELINE", default_value = DEFAULT_DESCRIPTION)]
    pipeline: String,

    /// STUN/TURN server URL, repeatable
    #[arg(long = "ice-server", env = "TV_RELAY_ICE_SERVERS", value_delimiter = ',')]
    ice_servers: Vec<String>,

    /// Seconds a viewer gets to answer the offer, 0 waits forever
    #[arg(long, env = "TV_RELAY_NEGOTIATION_TIMEOUT", default_value_t = 0)]
    negotiation_timeout: u64,

    /// Samples buffered per track between the pipeline and the track writer
    #[arg(long, env = "TV_RELAY_SAMPLE_QUEUE", default_value_t = DEFAULT_SAMPLE_QUEUE)]
    sample_queue: usize,
}

impl RelayConfig {
    /// Addresses to try binding, in order. A bare `:port` prefers the
    /// dual-stack wildcard and falls back to IPv4 on hosts without IPv6.
    pub fn listen_addrs(&self) -> Vec<String> {
        listen_candidates(&self.http_listen_address)
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    pub fn sample_queue(&self) -> usize {
        self.sample_queue
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            negotiation_timeout: match self.negotiation_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

fn listen_candidates(addr: &str) -> Vec<String> {
    match addr.strip_prefix(':') {
        Some(port) => vec![format!("[::]:{}", port), format!("0.0.0.0:{}", port)],
        None => vec![addr.to_string()],
    }
}

/// Bind the first address that works. Returns the listener and the address
/// it was bound with.
pub async fn bind_listener(addrs: &[String]) -> anyhow::Result<(TcpListener, String)> {
    let mut last_error = None;
    for addr in addrs {
        match TcpListener::bind(addr.as_str()).await {
            Ok(listener) => return Ok((listener, addr.clone())),
            Err(e) => {
                log::debug!("cannot listen on {}: {}", addr, e);
                last_error = Some(anyhow::Error::new(e).context(format!("listen on {}", addr)));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no listen address configured")))
}
