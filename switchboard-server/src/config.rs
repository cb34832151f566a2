use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_sip_port() -> u16 {
    5060
}

fn default_admin_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_expires() -> u32 {
    60
}

fn default_media_connect_timeout_secs() -> u64 {
    10
}

fn default_media_keepalive_interval_secs() -> u64 {
    30
}

fn default_media_keepalive_timeout_secs() -> u64 {
    10
}

/// Everything the switchboard binary needs to start: where to listen, which
/// media nodes to connect to, where the dialplan lives, and how verbose to
/// be. Loaded from an optional TOML file, then overridden by `SWITCHBOARD_*`
/// environment variables, then by CLI flags — each layer only overrides what
/// the previous layer set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    #[serde(default = "default_sip_port")]
    pub sip_port: u16,

    /// Address advertised in Contact/Via headers. `None` means auto-detect
    /// the primary non-loopback IPv4 address at startup.
    #[serde(default)]
    pub advertise_addr: Option<IpAddr>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `host:port` addresses of the media nodes this instance pools over.
    /// At least one is required to start.
    #[serde(default)]
    pub media_nodes: Vec<String>,

    #[serde(default = "default_media_connect_timeout_secs")]
    pub media_connect_timeout_secs: u64,

    #[serde(default = "default_media_keepalive_interval_secs")]
    pub media_keepalive_interval_secs: u64,

    #[serde(default = "default_media_keepalive_timeout_secs")]
    pub media_keepalive_timeout_secs: u64,

    #[serde(default)]
    pub dialplan_path: Option<PathBuf>,

    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// REGISTER Expires floor; shorter requests are rejected with 423 and a
    /// Min-Expires header naming this value.
    #[serde(default = "default_min_expires")]
    pub min_expires: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            sip_port: default_sip_port(),
            advertise_addr: None,
            log_level: default_log_level(),
            media_nodes: Vec::new(),
            media_connect_timeout_secs: default_media_connect_timeout_secs(),
            media_keepalive_interval_secs: default_media_keepalive_interval_secs(),
            media_keepalive_timeout_secs: default_media_keepalive_timeout_secs(),
            dialplan_path: None,
            admin_port: default_admin_port(),
            min_expires: default_min_expires(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ServerResult<ServerConfig> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ServerError::Config(format!("reading {}: {}", path.as_ref().display(), e)))?;
        toml::from_str(&contents).map_err(|e| ServerError::Config(format!("parsing config file: {}", e)))
    }

    /// Applies `SWITCHBOARD_*` environment overrides on top of whatever is
    /// already set (defaults or a loaded file).
    pub fn apply_env_overrides(&mut self) -> ServerResult<()> {
        if let Ok(v) = std::env::var("SWITCHBOARD_BIND_ADDR") {
            self.bind_addr = v
                .parse()
                .map_err(|e| ServerError::Config(format!("SWITCHBOARD_BIND_ADDR: {}", e)))?;
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_SIP_PORT") {
            self.sip_port = v
                .parse()
                .map_err(|e| ServerError::Config(format!("SWITCHBOARD_SIP_PORT: {}", e)))?;
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_ADVERTISE_ADDR") {
            self.advertise_addr = Some(
                v.parse()
                    .map_err(|e| ServerError::Config(format!("SWITCHBOARD_ADVERTISE_ADDR: {}", e)))?,
            );
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_MEDIA_NODES") {
            self.media_nodes = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_DIALPLAN_PATH") {
            self.dialplan_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_ADMIN_PORT") {
            self.admin_port = v
                .parse()
                .map_err(|e| ServerError::Config(format!("SWITCHBOARD_ADMIN_PORT: {}", e)))?;
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_MIN_EXPIRES") {
            self.min_expires = v
                .parse()
                .map_err(|e| ServerError::Config(format!("SWITCHBOARD_MIN_EXPIRES: {}", e)))?;
        }
        Ok(())
    }

    /// Detects the primary non-loopback IPv4 address by opening a UDP socket
    /// towards a public address and reading back the local endpoint — no
    /// packet is actually sent.
    pub fn resolve_advertise_addr(&self) -> std::io::Result<IpAddr> {
        if let Some(addr) = self.advertise_addr {
            return Ok(addr);
        }
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.media_nodes.is_empty() {
            return Err(ServerError::Config("at least one media_nodes entry is required".to_string()));
        }
        Ok(())
    }
}

/// CLI flags for the `switchboard` binary. Anything left unset here falls
/// through to the environment, then the config file, then the built-in
/// default.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "SIP back-to-back user agent signaling core")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub bind_addr: Option<IpAddr>,

    #[arg(long)]
    pub sip_port: Option<u16>,

    #[arg(long)]
    pub advertise_addr: Option<IpAddr>,

    #[arg(long)]
    pub log_level: Option<String>,

    /// Comma-separated `host:port` media node addresses.
    #[arg(long, value_delimiter = ',')]
    pub media_nodes: Option<Vec<String>>,

    #[arg(long)]
    pub dialplan_path: Option<PathBuf>,

    #[arg(long)]
    pub admin_port: Option<u16>,
}

impl Cli {
    /// Builds the effective configuration: file (if named), then
    /// `SWITCHBOARD_*` environment overrides, then these CLI flags.
    pub fn load_config(&self) -> ServerResult<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        config.apply_env_overrides()?;

        if let Some(v) = self.bind_addr {
            config.bind_addr = v;
        }
        if let Some(v) = self.sip_port {
            config.sip_port = v;
        }
        if let Some(v) = self.advertise_addr {
            config.advertise_addr = Some(v);
        }
        if let Some(v) = &self.log_level {
            config.log_level = v.clone();
        }
        if let Some(v) = &self.media_nodes {
            config.media_nodes = v.clone();
        }
        if let Some(v) = &self.dialplan_path {
            config.dialplan_path = Some(v.clone());
        }
        if let Some(v) = self.admin_port {
            config.admin_port = v;
        }

        config.validate()?;
        Ok(config)
    }
}
