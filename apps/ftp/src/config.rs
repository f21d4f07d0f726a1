//! Client configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/skyftp/config.toml`
//! - Windows: `%APPDATA%/skyftp/config.toml`
//!
//! Command line options override the values read from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skyftp_link::DEFAULT_MTU;
use skyftp_protocol::Backend;
use skyftp_transfer::ClientConfig;

use crate::cli::GlobalArgs;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Remote node address (`host:port`).
    #[serde(default = "default_host")]
    pub host: String,

    /// Payload bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u16,

    /// Storage backend for path based commands.
    #[serde(default)]
    pub backend: Backend,

    /// Timeout for each request in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How many times an interrupted transfer is resumed before giving up.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_mtu")]
    pub mtu: usize,
}

fn default_host() -> String {
    "127.0.0.1:9000".into()
}

fn default_chunk_size() -> u16 {
    185
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    3
}

fn default_mtu() -> usize {
    DEFAULT_MTU
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            chunk_size: default_chunk_size(),
            backend: Backend::default(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            mtu: default_mtu(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing default file is created with default values. A missing file
    /// named explicitly is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }

        let path = config_path()?;
        if path.exists() {
            Self::read(&path)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies the options given on the command line.
    pub fn apply(mut self, args: &GlobalArgs) -> Self {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(chunk_size) = args.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(backend) = args.backend {
            self.backend = backend;
        }
        if let Some(timeout) = args.timeout {
            self.timeout_ms = timeout;
        }
        if let Some(retries) = args.retries {
            self.retries = retries;
        }
        if let Some(mtu) = args.mtu {
            self.mtu = mtu;
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Engine settings derived from this configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default().with_timeout(self.timeout())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("skyftp")
            .join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("skyftp").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/skyftp/config.toml"))
    }
}
