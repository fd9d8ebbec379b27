//! Server-side connection handler.
//!
//! One command per connection: read a line, answer it, close. The stream is
//! owned by the handler and dropped exactly once when it returns, whatever
//! path it took.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionController, AdmissionSlot};
use crate::codec::LineStream;
use crate::error::{Error, Result};
use crate::files::{list_root, resolve_under_root};
use crate::logger::Logger;
use crate::protocol::{error_line, filesize_line, line, message, Command};
use crate::transfer::{send_file, StallPolicy, TransferMode, TransferSession};

/// Everything a handler needs, shared by all connections of one server.
pub struct HandlerContext {
    /// Canonical served root
    pub root: PathBuf,
    pub admission: AdmissionController,
    pub admission_timeout: Duration,
    pub socket_timeout: Duration,
    pub stall: StallPolicy,
    pub logger: Arc<dyn Logger>,
    /// Fired when the server gives up waiting for in-flight handlers.
    pub cancel: CancellationToken,
}

pub async fn handle_connection(ctx: Arc<HandlerContext>, stream: TcpStream, peer: SocketAddr) {
    ctx.logger.connected(peer);
    if let Err(e) = serve_command(&ctx, stream, peer).await {
        ctx.logger.error(&format!("client {}", peer), &e.to_string());
    }
    ctx.logger.disconnected(peer);
}

async fn serve_command(ctx: &HandlerContext, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let mut lines = LineStream::new(stream).with_timeout(ctx.socket_timeout);

    let Some(raw) = lines.read_line().await? else {
        // peer went away without a command; nothing to answer
        return Ok(());
    };
    ctx.logger.command(peer, &raw);

    let cmd = match Command::parse(&raw) {
        Ok(cmd) => cmd,
        Err(Error::InvalidMode(mode)) => {
            ctx.logger.rejected(peer, &format!("invalid mode {:?}", mode));
            return lines.write_line(&error_line(message::INVALID_MODE)).await;
        }
        Err(_) => {
            return lines
                .write_line(&error_line(message::INVALID_DOWNLOAD_FORMAT))
                .await;
        }
    };

    match cmd {
        Command::List => send_listing(ctx, &mut lines, peer).await,
        Command::Download { filename, mode } => send_download(ctx, lines, peer, &filename, mode).await,
        Command::Unknown(_) => lines.write_line(&error_line(message::UNKNOWN_COMMAND)).await,
    }
}

async fn send_listing(ctx: &HandlerContext, lines: &mut LineStream<TcpStream>, peer: SocketAddr) -> Result<()> {
    let names = match list_root(&ctx.root) {
        Ok(names) => names,
        Err(e) => {
            ctx.logger.error("list", &e.to_string());
            return lines.write_line(&error_line(message::NO_FILES)).await;
        }
    };
    for name in &names {
        lines.write_line(name).await?;
    }
    lines.write_line(line::END).await?;
    ctx.logger.listed(peer, names.len());
    Ok(())
}

async fn send_download(
    ctx: &HandlerContext,
    mut lines: LineStream<TcpStream>,
    peer: SocketAddr,
    filename: &str,
    mode: TransferMode,
) -> Result<()> {
    let path = match resolve_under_root(&ctx.root, filename) {
        Ok(path) => path,
        Err(Error::SecurityViolation(name)) => {
            ctx.logger.security(peer, &name);
            return lines.write_line(&error_line(message::INVALID_FILE_NAME)).await;
        }
        Err(Error::NotFound(_)) => {
            return lines.write_line(&error_line(message::FILE_NOT_FOUND)).await;
        }
        Err(e) => return Err(e),
    };

    let slot = match ctx.admission.acquire(ctx.admission_timeout).await {
        Ok(slot) => slot,
        Err(Error::Busy(_)) => {
            ctx.logger.rejected(peer, "no free transfer slot");
            return lines.write_line(&error_line(message::SERVER_BUSY)).await;
        }
        Err(e) => return Err(e),
    };

    run_transfer(ctx, slot, lines, peer, filename, &path, mode).await
}

async fn run_transfer(
    ctx: &HandlerContext,
    slot: AdmissionSlot,
    mut lines: LineStream<TcpStream>,
    peer: SocketAddr,
    filename: &str,
    path: &Path,
    mode: TransferMode,
) -> Result<()> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // removed between resolution and open
            return lines.write_line(&error_line(message::FILE_NOT_FOUND)).await;
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata()?.len();

    lines.write_line(&filesize_line(size)).await?;
    lines.write_line(line::READY).await?;

    let (mut stream, _) = lines.into_parts();
    let started = Instant::now();
    let mut session = TransferSession::new(mode, size, ctx.stall, ctx.cancel.clone());
    let result = send_file(&mut session, file, &mut stream).await;
    // the slot goes back before the connection is closed
    drop(slot);
    let sent = result?;
    ctx.logger
        .transfer_done(peer, filename, sent, mode, started.elapsed());
    Ok(())
}
