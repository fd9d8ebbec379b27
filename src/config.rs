//! Server and client configuration.
//!
//! The server reads an optional TOML file; command-line flags override what
//! it sets. Every field has a default so an empty file is valid.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::defaults;
use crate::transfer::StallPolicy;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (host:port)
    pub bind: String,
    /// Directory whose files are served
    pub root: PathBuf,
    /// Connection-handling workers
    pub workers: usize,
    /// Concurrent transfer sessions
    pub max_transfers: usize,
    pub admission_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub max_stall_ms: u64,
    pub grace_period_ms: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", defaults::PORT),
            root: PathBuf::from("files"),
            workers: defaults::WORKERS,
            max_transfers: defaults::MAX_TRANSFERS,
            admission_timeout_ms: defaults::ADMISSION_TIMEOUT_MS,
            socket_timeout_ms: defaults::SOCKET_TIMEOUT_MS,
            max_stall_ms: defaults::MAX_STALL_MS,
            grace_period_ms: defaults::GRACE_PERIOD_MS,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.max_transfers == 0 {
            anyhow::bail!("max_transfers must be at least 1");
        }
        if self.max_stall_ms == 0 {
            anyhow::bail!("max_stall_ms must be positive");
        }
        Ok(())
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stall_policy(&self) -> StallPolicy {
        StallPolicy {
            max_stall: Duration::from_millis(self.max_stall_ms),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub server: String,
    /// Where downloads are written
    pub dest_dir: PathBuf,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub stall: StallPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", defaults::PORT),
            dest_dir: PathBuf::from("downloads"),
            connect_timeout: Duration::from_millis(defaults::CONNECT_MS),
            socket_timeout: Duration::from_millis(defaults::SOCKET_TIMEOUT_MS),
            stall: StallPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.workers, 10);
        assert_eq!(cfg.max_transfers, 5);
        assert_eq!(cfg.admission_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.bind, "0.0.0.0:8000");
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_file_overrides_some_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferryd.toml");
        std::fs::write(&path, "root = \"/srv/files\"\nmax_transfers = 2\n").unwrap();
        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/srv/files"));
        assert_eq!(cfg.max_transfers, 2);
        assert_eq!(cfg.workers, 10);
    }

    #[test]
    fn zero_pools_are_rejected() {
        let cfg = ServerConfig {
            max_transfers: 0,
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
