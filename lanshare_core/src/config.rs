use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "lanshare";
const APP_NAME: &str = "lanshare";
const CONFIG_FILE: &str = "config.json";
const DATA_FOLDER: &str = "LAN Share Data";

/// Well-known UDP port for presence broadcasts
pub const DISCOVERY_PORT: u16 = 65431;
/// Well-known TCP port for file transfers
pub const TRANSFER_PORT: u16 = 65432;
/// Well-known TCP port for QR pairing
pub const PAIRING_PORT: u16 = 65433;

/// Runtime configuration for a node.
///
/// Every field has a default so a partial `config.json` is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    pub nickname: String,
    /// Source of outbound items
    pub shared_dir: PathBuf,
    /// Destination of inbound items
    pub download_dir: PathBuf,
    /// Address announced to peers. Detected from the active interface when unset.
    pub advertise_ip: Option<IpAddr>,
    /// Interface the listeners bind to
    pub bind_ip: IpAddr,
    /// Destination of presence broadcasts
    pub broadcast_ip: IpAddr,
    pub discovery_port: u16,
    pub transfer_port: u16,
    pub pairing_port: u16,
    pub broadcast_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub peer_timeout_secs: u64,
    /// Extra freshness granted to peers registered through pairing
    pub pairing_grace_secs: u64,
    pub pairing_timeout_secs: u64,
    pub io_timeout_secs: u64,
    /// How long an inbound request waits for the accept/reject answer
    pub decision_timeout_secs: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        let data_dir = directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DATA_FOLDER);

        Self {
            nickname: default_nickname(),
            shared_dir: data_dir.join("sharable"),
            download_dir: data_dir.join("downloads"),
            advertise_ip: None,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_port: DISCOVERY_PORT,
            transfer_port: TRANSFER_PORT,
            pairing_port: PAIRING_PORT,
            broadcast_interval_secs: 3,
            sweep_interval_secs: 5,
            peer_timeout_secs: 30,
            pairing_grace_secs: 300,
            pairing_timeout_secs: 5,
            io_timeout_secs: 10,
            decision_timeout_secs: 120,
        }
    }
}

fn default_nickname() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "Unknown-PC".to_string())
}

impl ShareConfig {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("LANSHARE_CONFIG_DIR") {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config from disk or return default, then apply environment overrides
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = match Self::config_path() {
            Some(path) => match fs::read_to_string(&path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                    Self::default()
                }),
                Err(_) => Self::default(),
            },
            None => Self::default(),
        };

        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(nickname) = std::env::var("LANSHARE_NICKNAME") {
            if !nickname.trim().is_empty() {
                self.nickname = nickname.trim().to_string();
            }
        }
        if let Some(secs) = std::env::var("LANSHARE_DECISION_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.decision_timeout_secs = secs;
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().context("No config directory available")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Create the shared and download roots if they are missing
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.shared_dir, &self.download_dir] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        Ok(())
    }

    /// Address announced in broadcasts and pairing identities
    pub fn local_ip(&self) -> IpAddr {
        self.advertise_ip.unwrap_or_else(detect_local_ip)
    }

    /// At least one second, whatever the file says
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs.max(1))
    }

    /// At least one second, whatever the file says
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn pairing_grace(&self) -> Duration {
        Duration::from_secs(self.pairing_grace_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }
}

/// Pick the LAN address of this machine, preferring private IPv4 ranges.
pub fn detect_local_ip() -> IpAddr {
    if let Ok(ip) = local_ip_address::local_ip() {
        if !ip.is_loopback() {
            return ip;
        }
    }

    local_ip_address::list_afinet_netifas()
        .ok()
        .and_then(|ips| {
            let mut best_ip = None;
            for (_name, ip) in ips {
                if ip.is_loopback() || !ip.is_ipv4() {
                    continue;
                }
                let ip_str = ip.to_string();
                if ip_str.starts_with("192.168.") {
                    return Some(ip);
                }
                if ip_str.starts_with("10.") || best_ip.is_none() {
                    best_ip = Some(ip);
                }
            }
            best_ip
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
