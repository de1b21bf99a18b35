//! Configuration for both roles.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialer::{split_host_port, Dialer, DirectDialer, Socks5Dialer};
use crate::error::{Error, Result};
use crate::mux::{
    MuxClient, MuxConfig, DEFAULT_DIAL_TIMEOUT, DEFAULT_ENDPOINT_BUFFER, DEFAULT_QUEUE_CAPACITY,
};
use crate::transport::websocket;

/// Default virtual interface name.
pub const DEFAULT_TUN_NAME: &str = "tun0";

/// Which side of the tunnel this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Forwards flows to an upstream
    Client,
    /// Terminates multiplexed transports and dials destinations
    Server,
}

/// How flows (client) or endpoints (server) reach their destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Upstream {
    /// Plain outbound TCP
    Direct,
    /// Through a SOCKS5 proxy
    Socks5 {
        addr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Through a multiplexer server at `host:port` or `ws://host:port/<secret>`
    Tunnel { addr: String },
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Role of this process
    pub role: Role,
    /// Virtual interface the flows come from
    pub tun_name: String,
    /// Listen address (server only)
    pub listen: Option<String>,
    /// Serve WebSocket upgrades on this path instead of records (server only)
    pub websocket_path: Option<String>,
    /// Dial strategy
    pub upstream: Upstream,
    /// Multiplexer settings
    pub mux: MuxConfig,
}

impl Config {
    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::config(e.to_string()))?;
        let config = file.to_config();
        config.validate()?;
        Ok(config)
    }

    /// A runnable starting point for `role`.
    pub fn sample(role: Role) -> Self {
        match role {
            Role::Client => Self {
                role,
                tun_name: DEFAULT_TUN_NAME.to_string(),
                listen: None,
                websocket_path: None,
                upstream: Upstream::Tunnel {
                    addr: "127.0.0.1:8080".to_string(),
                },
                mux: MuxConfig::default(),
            },
            Role::Server => Self {
                role,
                tun_name: DEFAULT_TUN_NAME.to_string(),
                listen: Some("0.0.0.0:8080".to_string()),
                websocket_path: None,
                upstream: Upstream::Direct,
                mux: MuxConfig::default(),
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.tun_name.is_empty() {
            return Err(Error::config("tun_name cannot be empty"));
        }

        match (&self.role, &self.listen) {
            (Role::Server, None) => return Err(Error::config("server role requires listen")),
            (_, Some(listen)) => check_addr("listen", listen)?,
            (Role::Client, None) => {}
        }

        match (&self.role, &self.websocket_path) {
            (Role::Client, Some(_)) => {
                return Err(Error::config("websocket_path is a server setting"));
            }
            (Role::Server, Some(path)) if path.trim_start_matches('/').is_empty() => {
                return Err(Error::config("websocket_path cannot be empty"));
            }
            _ => {}
        }

        match &self.upstream {
            Upstream::Direct => {}
            Upstream::Socks5 {
                addr,
                username,
                password,
            } => {
                check_addr("upstream.addr", addr)?;
                if username.is_some() != password.is_some() {
                    return Err(Error::config(
                        "socks5 username and password must be set together",
                    ));
                }
            }
            Upstream::Tunnel { addr } if websocket::is_websocket_url(addr) => {
                websocket::parse_url(addr)
                    .map_err(|e| Error::config(format!("upstream.addr: {}", e)))?;
            }
            Upstream::Tunnel { addr } => check_addr("upstream.addr", addr)?,
        }

        if self.mux.queue_capacity == 0 {
            return Err(Error::config("mux.queue_capacity must be positive"));
        }
        if self.mux.endpoint_buffer == 0 {
            return Err(Error::config("mux.endpoint_buffer must be positive"));
        }
        if self.mux.dial_timeout.is_zero() {
            return Err(Error::config("mux.dial_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Build the dialer described by `upstream`.
    ///
    /// A tunnel upstream connects to the multiplexer server right away.
    pub async fn build_dialer(&self) -> Result<Arc<dyn Dialer>> {
        let dialer: Arc<dyn Dialer> = match &self.upstream {
            Upstream::Direct => Arc::new(DirectDialer::new()),
            Upstream::Socks5 {
                addr,
                username,
                password,
            } => {
                let dialer = Socks5Dialer::new(addr.clone());
                match (username, password) {
                    (Some(user), Some(pass)) => Arc::new(dialer.with_auth(user, pass)),
                    _ => Arc::new(dialer),
                }
            }
            Upstream::Tunnel { addr } => Arc::new(MuxClient::connect(addr, self.mux.clone()).await?),
        };
        Ok(dialer)
    }
}

fn check_addr(field: &str, addr: &str) -> Result<()> {
    split_host_port(addr)
        .map(|_| ())
        .map_err(|e| Error::config(format!("{}: {}", field, e)))
}

/// `[mux]` table of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxSection {
    pub queue_capacity: usize,
    pub endpoint_buffer: usize,
    pub dial_timeout_secs: u64,
}

impl Default for MuxSection {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            endpoint_buffer: DEFAULT_ENDPOINT_BUFFER,
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT.as_secs(),
        }
    }
}

/// Configuration file format for serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub role: Role,
    #[serde(default = "default_tun_name")]
    pub tun_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_path: Option<String>,
    pub upstream: Upstream,
    #[serde(default)]
    pub mux: MuxSection,
}

fn default_tun_name() -> String {
    DEFAULT_TUN_NAME.to_string()
}

impl ConfigFile {
    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Config {
        Config {
            role: self.role,
            tun_name: self.tun_name.clone(),
            listen: self.listen.clone(),
            websocket_path: self.websocket_path.clone(),
            upstream: self.upstream.clone(),
            mux: MuxConfig {
                queue_capacity: self.mux.queue_capacity,
                endpoint_buffer: self.mux.endpoint_buffer,
                dial_timeout: Duration::from_secs(self.mux.dial_timeout_secs),
            },
        }
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            role: config.role,
            tun_name: config.tun_name.clone(),
            listen: config.listen.clone(),
            websocket_path: config.websocket_path.clone(),
            upstream: config.upstream.clone(),
            mux: MuxSection {
                queue_capacity: config.mux.queue_capacity,
                endpoint_buffer: config.mux.endpoint_buffer,
                dial_timeout_secs: config.mux.dial_timeout.as_secs(),
            },
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }
}
