//! Clipbird Core - LAN clipboard sync library
//!
//! One host acts as server and relays clipboard snapshots between the
//! clients connected to it. Hosts find each other over mDNS and talk over
//! TLS with certificates pinned on first use.

pub mod clipboard;
pub mod coordinator;
pub mod crypto;
pub mod device;
pub mod discovery;
pub mod history;
pub mod protocol;
pub mod serde_utils;
pub mod store;
pub mod sync;

mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

use protocol::constants;

/// Configuration for the Clipbird service.
///
/// Every field may be omitted from the TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the server role listens on; 0 picks a free one
    pub port: u16,
    /// mDNS service type, carrying the protocol version
    pub service_type: String,
    /// Where the store and config live
    pub data_dir: PathBuf,
    /// Name this host shows to peers
    pub device_name: String,
    pub history_limit: usize,
    pub send_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub clipboard_poll_ms: u64,
    /// Advertise (server) or browse (client) over mDNS
    pub discovery: bool,
    /// Connect to discovered servers that are already trusted
    pub auto_connect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_PORT,
            service_type: constants::SERVICE_TYPE.to_string(),
            data_dir: default_data_dir(),
            device_name: default_device_name(),
            history_limit: constants::DEFAULT_HISTORY_LIMIT,
            send_timeout_ms: constants::SEND_TIMEOUT_MS,
            handshake_timeout_ms: constants::HANDSHAKE_TIMEOUT_MS,
            clipboard_poll_ms: constants::CLIPBOARD_POLL_INTERVAL_MS,
            discovery: true,
            auto_connect: true,
        }
    }
}

impl Config {
    pub const FILE_NAME: &'static str = "config.toml";

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// `config.toml` in `data_dir` if present, defaults otherwise
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(Self {
                data_dir: data_dir.to_path_buf(),
                ..Self::default()
            });
        }

        let mut config = Self::load(&path)?;
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be at least 1".to_string()));
        }
        if self.send_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.clipboard_poll_ms == 0 {
            return Err(Error::Config("clipboard_poll_ms must be non-zero".to_string()));
        }
        if self.device_name.trim().is_empty() {
            return Err(Error::Config("device_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn clipboard_poll_interval(&self) -> Duration {
        Duration::from_millis(self.clipboard_poll_ms)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clipbird")
}

fn default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "Clipbird".to_string())
}

// Re-export key types for convenience
pub use clipboard::{ClipboardBackend, MemoryClipboard, SystemClipboard};
pub use coordinator::{CoordinatorHandle, SyncCoordinator};
pub use crypto::HostIdentity;
pub use device::Device;
pub use history::History;
pub use protocol::{ClipItem, Snapshot};
pub use store::{FileStore, MemoryStore, SettingsStore, SharedStore, TrustScope};
pub use sync::{HostType, SyncEvent};
