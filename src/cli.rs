//! Command-line options for `ferryd` and `ferry`

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ClientConfig, ServerConfig};
use crate::protocol::defaults;
use crate::transfer::{StallPolicy, TransferMode};

/// Server options. Flags override values from `--config`.
#[derive(Clone, Debug, Parser)]
#[command(name = "ferryd", version, about = "Serve a directory over the ferry line protocol")]
pub struct DaemonOpts {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Connection-handling workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Concurrent transfers allowed
    #[arg(long)]
    pub max_transfers: Option<usize>,

    /// How long a download waits for a transfer slot (ms)
    #[arg(long)]
    pub admission_timeout_ms: Option<u64>,

    /// Control-line read/write timeout (ms)
    #[arg(long)]
    pub socket_timeout_ms: Option<u64>,

    /// Longest a transfer may go without progress (ms)
    #[arg(long)]
    pub max_stall_ms: Option<u64>,

    /// Shutdown grace period for in-flight connections (ms)
    #[arg(long)]
    pub grace_period_ms: Option<u64>,

    /// Append server events to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Do not log server events
    #[arg(short, long)]
    pub quiet: bool,
}

impl DaemonOpts {
    pub fn into_config(self) -> Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(v) = self.bind {
            cfg.bind = v;
        }
        if let Some(v) = self.root {
            cfg.root = v;
        }
        if let Some(v) = self.workers {
            cfg.workers = v;
        }
        if let Some(v) = self.max_transfers {
            cfg.max_transfers = v;
        }
        if let Some(v) = self.admission_timeout_ms {
            cfg.admission_timeout_ms = v;
        }
        if let Some(v) = self.socket_timeout_ms {
            cfg.socket_timeout_ms = v;
        }
        if let Some(v) = self.max_stall_ms {
            cfg.max_stall_ms = v;
        }
        if let Some(v) = self.grace_period_ms {
            cfg.grace_period_ms = v;
        }
        if self.log_file.is_some() {
            cfg.log_file = self.log_file;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Clone, Debug, Parser)]
#[command(name = "ferry", version, about = "List and download files from a ferryd server")]
pub struct ClientOpts {
    /// Server address (host:port)
    #[arg(long, short, default_value_t = format!("127.0.0.1:{}", defaults::PORT))]
    pub server: String,

    /// Directory downloads are written to
    #[arg(long, short, default_value = "downloads")]
    pub dest: PathBuf,

    /// Longest a download may go without progress (ms)
    #[arg(long, default_value_t = defaults::MAX_STALL_MS)]
    pub max_stall_ms: u64,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Without a command an interactive shell is started
    #[command(subcommand)]
    pub command: Option<ClientCommand>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Show files on the server
    List,
    /// Download one file
    Download {
        file: String,
        /// zero (kernel zero-copy) or normal (read/write)
        mode: TransferMode,
    },
    /// Interactive shell (help, list, download, exit)
    Shell,
}

impl ClientOpts {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server: self.server.clone(),
            dest_dir: self.dest.clone(),
            stall: StallPolicy {
                max_stall: Duration::from_millis(self.max_stall_ms),
            },
            ..ClientConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let opts = DaemonOpts::parse_from(["ferryd", "--root", "/srv", "--max-transfers", "3"]);
        let cfg = opts.into_config().unwrap();
        assert_eq!(cfg.root, PathBuf::from("/srv"));
        assert_eq!(cfg.max_transfers, 3);
        assert_eq!(cfg.workers, defaults::WORKERS);
    }

    #[test]
    fn client_download_mode_is_validated() {
        let opts = ClientOpts::parse_from(["ferry", "download", "a.bin", "zero"]);
        assert!(matches!(
            opts.command,
            Some(ClientCommand::Download { mode: TransferMode::Zero, .. })
        ));
        assert!(ClientOpts::try_parse_from(["ferry", "download", "a.bin", "turbo"]).is_err());
    }
}
