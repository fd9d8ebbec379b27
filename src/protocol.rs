//! Shared protocol constants and command grammar for the ferry line protocol

use crate::error::{Error, Result};
use crate::transfer::TransferMode;

// Longest control line accepted before the peer is considered misbehaving
pub const MAX_LINE_LEN: usize = 4 * 1024;

// Wire keywords
pub mod line {
    pub const LIST: &str = "LIST";
    pub const DOWNLOAD: &str = "DOWNLOAD";
    pub const END: &str = "END";
    pub const ERROR: &str = "ERROR";
    pub const FILESIZE: &str = "FILESIZE";
    pub const READY: &str = "READY";
}

// Messages carried after `ERROR ` (clients match on these)
pub mod message {
    pub const UNKNOWN_COMMAND: &str = "Unknown command";
    pub const NO_FILES: &str = "No files";
    pub const INVALID_DOWNLOAD_FORMAT: &str = "Invalid download format";
    pub const INVALID_MODE: &str = "Invalid mode";
    pub const INVALID_FILE_NAME: &str = "Invalid file name";
    pub const FILE_NOT_FOUND: &str = "File not found";
    pub const SERVER_BUSY: &str = "Server busy, try again later";
}

// Centralized defaults for timeouts and pool sizes
pub mod defaults {
    pub const PORT: u16 = 8000;

    // Connection-handling worker pool
    pub const WORKERS: usize = 10;

    // Concurrent transfer sessions
    pub const MAX_TRANSFERS: usize = 5;

    // How long a download waits for an admission slot (ms)
    pub const ADMISSION_TIMEOUT_MS: u64 = 5_000;

    // Per-socket read/write timeout for control lines (ms)
    pub const SOCKET_TIMEOUT_MS: u64 = 30_000;

    // Longest time a transfer may go without moving a byte (ms)
    pub const MAX_STALL_MS: u64 = 1_000;

    // How long shutdown waits for in-flight handlers (ms)
    pub const GRACE_PERIOD_MS: u64 = 5_000;

    // Extra wait after cancelling handlers before they are aborted (ms)
    pub const FORCE_DRAIN_MS: u64 = 250;

    // Connection establishment timeout for clients (ms)
    pub const CONNECT_MS: u64 = 5_000;
}

/// A parsed client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    List,
    Download { filename: String, mode: TransferMode },
    Unknown(String),
}

impl Command {
    /// Classify one control line.
    ///
    /// `DOWNLOAD` lines with the wrong number of arguments or an unknown mode
    /// are errors rather than `Unknown`, so the handler can answer with the
    /// matching message.
    pub fn parse(line: &str) -> Result<Command> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(line::LIST) if parts.next().is_none() => Ok(Command::List),
            Some(line::DOWNLOAD) => {
                let args: Vec<&str> = parts.collect();
                let [filename, mode] = args.as_slice() else {
                    return Err(Error::ProtocolViolation(
                        message::INVALID_DOWNLOAD_FORMAT.to_string(),
                    ));
                };
                let mode = mode.parse::<TransferMode>()?;
                Ok(Command::Download {
                    filename: filename.to_string(),
                    mode,
                })
            }
            _ => Ok(Command::Unknown(line.to_string())),
        }
    }

    /// Render the command as it travels on the wire (without the newline).
    pub fn to_line(&self) -> String {
        match self {
            Command::List => line::LIST.to_string(),
            Command::Download { filename, mode } => {
                format!("{} {} {}", line::DOWNLOAD, filename, mode)
            }
            Command::Unknown(raw) => raw.clone(),
        }
    }
}

pub fn error_line(msg: &str) -> String {
    format!("{} {}", line::ERROR, msg)
}

pub fn filesize_line(size: u64) -> String {
    format!("{} {}", line::FILESIZE, size)
}

/// Extract the message of an `ERROR <message>` line.
pub fn parse_error_line(l: &str) -> Option<&str> {
    let rest = l.strip_prefix(line::ERROR)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(' ').map(str::trim)
}

/// Parse `FILESIZE <n>`.
pub fn parse_filesize_line(l: &str) -> Result<u64> {
    let n = l
        .strip_prefix(line::FILESIZE)
        .and_then(|rest| rest.strip_prefix(' '))
        .ok_or_else(|| Error::ProtocolViolation(format!("expected FILESIZE, got {:?}", l)))?;
    n.trim()
        .parse::<u64>()
        .map_err(|_| Error::ProtocolViolation(format!("bad FILESIZE value {:?}", n)))
}
