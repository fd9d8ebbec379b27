use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::transfer::TransferMode;

/// Server event sink. Every method defaults to a no-op so sinks only
/// implement what they record.
pub trait Logger: Send + Sync {
    fn listening(&self, _addr: SocketAddr, _root: &Path) {}
    fn connected(&self, _peer: SocketAddr) {}
    fn command(&self, _peer: SocketAddr, _line: &str) {}
    fn listed(&self, _peer: SocketAddr, _count: usize) {}
    fn transfer_done(&self, _peer: SocketAddr, _name: &str, _bytes: u64, _mode: TransferMode, _elapsed: Duration) {}
    fn rejected(&self, _peer: SocketAddr, _reason: &str) {}
    fn security(&self, _peer: SocketAddr, _name: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn disconnected(&self, _peer: SocketAddr) {}
    fn shutdown(&self, _in_flight: usize) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

fn throughput_mb_s(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs / 1_048_576.0
    } else {
        0.0
    }
}

fn format_event(ev: Event<'_>) -> String {
    match ev {
        Event::Listening(addr, root) => {
            format!("[SERVER] listening on {} root={}", addr, root.display())
        }
        Event::Connected(peer) => format!("[SERVER] client connected: {}", peer),
        Event::Command(peer, line) => format!("[SERVER] {} sent: {}", peer, line),
        Event::Listed(peer, count) => format!("[LIST] sent {} file names to {}", count, peer),
        Event::TransferDone(peer, name, bytes, mode, elapsed) => format!(
            "[SERVER] file sent to {}: {} ({} bytes) in {} ms using {} mode ({:.1} MB/s)",
            peer,
            name,
            bytes,
            elapsed.as_millis(),
            mode,
            throughput_mb_s(bytes, elapsed)
        ),
        Event::Rejected(peer, reason) => format!("[SERVER] {} rejected: {}", peer, reason),
        Event::Security(peer, name) => {
            format!("[SECURITY] path traversal attempt from {}: {:?}", peer, name)
        }
        Event::Error(ctx, msg) => format!("[ERROR] {}: {}", ctx, msg),
        Event::Disconnected(peer) => format!("[SERVER] client disconnected: {}", peer),
        Event::Shutdown(n) => format!("[SERVER] shutting down, {} handler(s) in flight", n),
    }
}

enum Event<'a> {
    Listening(SocketAddr, &'a Path),
    Connected(SocketAddr),
    Command(SocketAddr, &'a str),
    Listed(SocketAddr, usize),
    TransferDone(SocketAddr, &'a str, u64, TransferMode, Duration),
    Rejected(SocketAddr, &'a str),
    Security(SocketAddr, &'a str),
    Error(&'a str, &'a str),
    Disconnected(SocketAddr),
    Shutdown(usize),
}

/// Writes tagged lines to stderr.
pub struct StderrLogger;

impl StderrLogger {
    fn emit(&self, ev: Event<'_>) {
        eprintln!("{}", format_event(ev));
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn emit(&self, ev: Event<'_>) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), format_event(ev));
        }
    }
}

macro_rules! forward_events {
    ($ty:ty) => {
        impl Logger for $ty {
            fn listening(&self, addr: SocketAddr, root: &Path) {
                self.emit(Event::Listening(addr, root));
            }
            fn connected(&self, peer: SocketAddr) {
                self.emit(Event::Connected(peer));
            }
            fn command(&self, peer: SocketAddr, line: &str) {
                self.emit(Event::Command(peer, line));
            }
            fn listed(&self, peer: SocketAddr, count: usize) {
                self.emit(Event::Listed(peer, count));
            }
            fn transfer_done(&self, peer: SocketAddr, name: &str, bytes: u64, mode: TransferMode, elapsed: Duration) {
                self.emit(Event::TransferDone(peer, name, bytes, mode, elapsed));
            }
            fn rejected(&self, peer: SocketAddr, reason: &str) {
                self.emit(Event::Rejected(peer, reason));
            }
            fn security(&self, peer: SocketAddr, name: &str) {
                self.emit(Event::Security(peer, name));
            }
            fn error(&self, context: &str, msg: &str) {
                self.emit(Event::Error(context, msg));
            }
            fn disconnected(&self, peer: SocketAddr) {
                self.emit(Event::Disconnected(peer));
            }
            fn shutdown(&self, in_flight: usize) {
                self.emit(Event::Shutdown(in_flight));
            }
        }
    };
}

forward_events!(StderrLogger);
forward_events!(TextLogger);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/ferryd.log");
        let log = TextLogger::new(&path).unwrap();
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        log.security(peer, "../etc/passwd");
        log.transfer_done(peer, "a.bin", 2_097_152, TransferMode::Zero, Duration::from_secs(1));
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[SECURITY]"));
        assert!(lines[1].contains("using zero mode (2.0 MB/s)"));
        assert!(lines[1].starts_with('['));
    }
}
