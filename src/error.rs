//! Error taxonomy shared by server and client

use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unexpected line content or a malformed command.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("file not found: {0}")]
    NotFound(String),

    /// Requested path resolves outside the served root.
    #[error("path escapes served root: {0}")]
    SecurityViolation(String),

    /// No admission slot became free in time.
    #[error("server busy: no transfer slot within {0} ms")]
    Busy(u64),

    #[error("invalid transfer mode {0:?} (expected zero or normal)")]
    InvalidMode(String),

    #[error("incomplete transfer: {moved}/{total} bytes ({reason})")]
    IncompleteTransfer {
        moved: u64,
        total: u64,
        reason: String,
    },

    #[error("transfer cancelled after {moved}/{total} bytes")]
    Cancelled { moved: u64, total: u64 },

    /// The server answered with `ERROR <message>`.
    #[error("server error: {0}")]
    Server(String),

    #[error("{0} timed out after {1} ms")]
    Timeout(&'static str, u64),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn incomplete(moved: u64, total: u64, reason: impl Into<String>) -> Self {
        Error::IncompleteTransfer {
            moved,
            total,
            reason: reason.into(),
        }
    }
}
