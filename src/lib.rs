//! Ferry library
//!
//! Line-protocol file server and client with two download strategies:
//! kernel zero-copy and buffered read/write.

pub mod admission;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod files;
pub mod handler;
pub mod logger;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod transfer;
#[cfg(target_os = "linux")]
pub mod zero_copy;

pub use error::{Error, Result};
pub use transfer::TransferMode;
