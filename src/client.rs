//! Client side of the protocol: `LIST` and `DOWNLOAD`.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::codec::LineStream;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{line, parse_error_line, parse_filesize_line, Command};
use crate::transfer::{receive_file, TransferMode, TransferSession};

#[derive(Clone, Debug)]
pub struct DownloadReport {
    /// Absolute location of the saved file
    pub path: PathBuf,
    pub bytes: u64,
    pub mode: TransferMode,
    pub elapsed: Duration,
}

impl DownloadReport {
    pub fn throughput_mb_s(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs / 1_048_576.0
        } else {
            0.0
        }
    }
}

pub struct Client {
    config: ClientConfig,
    cancel: CancellationToken,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts a stalled download when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn connect(&self) -> Result<LineStream<TcpStream>> {
        let limit = self.config.connect_timeout;
        let stream = match timeout(limit, TcpStream::connect(&self.config.server)).await {
            Ok(res) => res?,
            Err(_) => return Err(Error::Timeout("connect", limit.as_millis() as u64)),
        };
        let _ = stream.set_nodelay(true);
        Ok(LineStream::new(stream).with_timeout(self.config.socket_timeout))
    }

    /// Names served by the server, in the order it sent them.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut lines = self.connect().await?;
        lines.write_line(&Command::List.to_line()).await?;

        let mut names = Vec::new();
        loop {
            let Some(l) = lines.read_line().await? else {
                return Err(Error::ProtocolViolation("connection closed before END".into()));
            };
            if l == line::END {
                return Ok(names);
            }
            if let Some(msg) = parse_error_line(&l) {
                return Err(Error::Server(msg.to_string()));
            }
            names.push(l);
        }
    }

    pub async fn download(&self, filename: &str, mode: TransferMode) -> Result<DownloadReport> {
        self.download_with_progress(filename, mode, ProgressBar::hidden())
            .await
    }

    /// Download `filename` into the destination directory.
    ///
    /// On any failure after the destination file was created it is removed,
    /// so a truncated file is never left behind.
    pub async fn download_with_progress(
        &self,
        filename: &str,
        mode: TransferMode,
        bar: ProgressBar,
    ) -> Result<DownloadReport> {
        let local_name = Path::new(filename)
            .file_name()
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;

        let mut lines = self.connect().await?;
        let cmd = Command::Download {
            filename: filename.to_string(),
            mode,
        };
        lines.write_line(&cmd.to_line()).await?;

        let header = expect_line(&mut lines, line::FILESIZE).await?;
        if let Some(msg) = parse_error_line(&header) {
            return Err(Error::Server(msg.to_string()));
        }
        let total = parse_filesize_line(&header)?;

        let ready = expect_line(&mut lines, line::READY).await?;
        if ready != line::READY {
            let msg = parse_error_line(&ready).unwrap_or(&ready);
            return Err(Error::Server(msg.to_string()));
        }

        std::fs::create_dir_all(&self.config.dest_dir)?;
        let path = self.config.dest_dir.join(local_name);
        let (mut stream, early) = lines.into_parts();

        let started = Instant::now();
        let session = TransferSession::new(mode, total, self.config.stall, self.cancel.clone())
            .with_progress(bar);
        match receive_into(&path, session, &mut stream, &early).await {
            Ok(bytes) => Ok(DownloadReport {
                path: std::fs::canonicalize(&path).unwrap_or(path),
                bytes,
                mode,
                elapsed: started.elapsed(),
            }),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }
}

async fn expect_line(lines: &mut LineStream<TcpStream>, what: &str) -> Result<String> {
    lines
        .read_line()
        .await?
        .ok_or_else(|| Error::ProtocolViolation(format!("connection closed before {}", what)))
}

/// Payload bytes that arrived together with the control lines are written
/// first; the engine continues from that offset.
async fn receive_into(
    path: &Path,
    mut session: TransferSession,
    stream: &mut TcpStream,
    early: &[u8],
) -> Result<u64> {
    let mut file = std::fs::File::create(path)?;
    let take = early.len().min(session.total() as usize);
    if take > 0 {
        file.write_all(&early[..take])?;
        session.advance(take as u64);
    }
    receive_file(&mut session, stream, file).await
}
