//! Transfer engine: moves a declared number of bytes between a file and a
//! socket, either through the kernel (`zero`) or through a small userspace
//! buffer (`normal`).
//!
//! Both strategies follow the same shape in both directions:
//! - at most one chunk is in flight per step, and every step starts from the
//!   session's explicit offset;
//! - a step that cannot make progress waits on readiness for at most
//!   `StallPolicy::max_stall` before the transfer is declared dead;
//! - a stalled wait also ends when the session's cancellation token fires;
//! - the final byte count must equal the declared total.

use std::fmt;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use indicatif::ProgressBar;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::defaults::MAX_STALL_MS;

/// Ceiling for a single kernel transfer call.
pub const ZERO_COPY_CHUNK: usize = 64 * 1024;

/// Userspace buffer used by the `normal` mode.
pub const BUFFER_SIZE: usize = 8 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferMode {
    Zero,
    Normal,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Zero => "zero",
            TransferMode::Normal => "normal",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zero" => Ok(TransferMode::Zero),
            "normal" => Ok(TransferMode::Normal),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StallPolicy {
    pub max_stall: Duration,
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self {
            max_stall: Duration::from_millis(MAX_STALL_MS),
        }
    }
}

/// One in-progress movement of `total` bytes.
pub struct TransferSession {
    mode: TransferMode,
    total: u64,
    moved: u64,
    policy: StallPolicy,
    cancel: CancellationToken,
    progress: ProgressBar,
}

impl TransferSession {
    pub fn new(mode: TransferMode, total: u64, policy: StallPolicy, cancel: CancellationToken) -> Self {
        Self {
            mode,
            total,
            moved: 0,
            policy,
            cancel,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        bar.set_length(self.total);
        bar.set_position(self.moved);
        self.progress = bar;
        self
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn moved(&self) -> u64 {
        self.moved
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.moved
    }

    /// Account for bytes moved outside the engine (e.g. payload that arrived
    /// together with the control lines).
    pub fn advance(&mut self, n: u64) {
        debug_assert!(n <= self.remaining());
        self.moved += n.min(self.remaining());
        self.progress.set_position(self.moved);
    }

    fn finish(&self) -> Result<u64> {
        if self.moved != self.total {
            return Err(Error::incomplete(self.moved, self.total, "byte count mismatch"));
        }
        Ok(self.moved)
    }

    fn next_chunk(&self, ceiling: usize) -> usize {
        self.remaining().min(ceiling as u64) as usize
    }

    /// Run one I/O step that is expected to make progress within the stall
    /// budget.
    async fn step<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let limit = self.policy.max_stall;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled {
                moved: self.moved,
                total: self.total,
            }),
            res = timeout(limit, fut) => match res {
                Ok(r) => Ok(r?),
                Err(_) => Err(Error::incomplete(
                    self.moved,
                    self.total,
                    format!("{} stalled for {} ms", what, limit.as_millis()),
                )),
            },
        }
    }
}

/// Buffered copy: read up to one buffer, write all of it, repeat.
pub async fn copy_buffered<R, W>(session: &mut TransferSession, src: &mut R, dst: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    while session.remaining() > 0 {
        let want = session.next_chunk(buf.len());
        let n = session.step("read", src.read(&mut buf[..want])).await?;
        if n == 0 {
            return Err(Error::incomplete(
                session.moved(),
                session.total(),
                "source reached end of stream early",
            ));
        }
        let mut written = 0;
        while written < n {
            let w = session.step("write", dst.write(&buf[written..n])).await?;
            if w == 0 {
                return Err(Error::incomplete(session.moved(), session.total(), "sink closed"));
            }
            written += w;
        }
        session.advance(n as u64);
    }
    session.step("flush", dst.flush()).await?;
    session.finish()
}

/// Server side: stream `file` to the socket using the session's mode.
pub async fn send_file(session: &mut TransferSession, file: std::fs::File, stream: &mut TcpStream) -> Result<u64> {
    match session.mode() {
        #[cfg(target_os = "linux")]
        TransferMode::Zero => send_zero_copy(session, &file, stream).await,
        _ => {
            let mut src = tokio::fs::File::from_std(file);
            if session.moved() > 0 {
                use tokio::io::AsyncSeekExt;
                src.seek(io::SeekFrom::Start(session.moved())).await?;
            }
            copy_buffered(session, &mut src, stream).await
        }
    }
}

/// Client side: write the payload arriving on the socket into `file`,
/// starting at the session's current offset.
pub async fn receive_file(session: &mut TransferSession, stream: &mut TcpStream, file: std::fs::File) -> Result<u64> {
    match session.mode() {
        #[cfg(target_os = "linux")]
        TransferMode::Zero => receive_zero_copy(session, stream, &file).await,
        _ => {
            let mut dst = tokio::fs::File::from_std(file);
            if session.moved() > 0 {
                use tokio::io::AsyncSeekExt;
                dst.seek(io::SeekFrom::Start(session.moved())).await?;
            }
            copy_buffered(session, stream, &mut dst).await
        }
    }
}

#[cfg(target_os = "linux")]
async fn send_zero_copy(session: &mut TransferSession, file: &std::fs::File, stream: &TcpStream) -> Result<u64> {
    use std::os::fd::AsRawFd;
    use tokio::io::Interest;

    let sock = stream.as_raw_fd();
    while session.remaining() > 0 {
        let offset = session.moved();
        let count = session.next_chunk(ZERO_COPY_CHUNK);
        let io = stream.async_io(Interest::WRITABLE, || {
            crate::zero_copy::sendfile_at(sock, file, offset, count)
        });
        let n = session.step("sendfile", io).await?;
        if n == 0 {
            return Err(Error::incomplete(
                session.moved(),
                session.total(),
                "source file ended early",
            ));
        }
        session.advance(n as u64);
    }
    session.finish()
}

#[cfg(target_os = "linux")]
async fn receive_zero_copy(session: &mut TransferSession, stream: &TcpStream, file: &std::fs::File) -> Result<u64> {
    use crate::zero_copy::{splice_pipe_to_file, splice_socket_to_pipe, Pipe};
    use std::os::fd::AsRawFd;
    use tokio::io::Interest;

    let pipe = Pipe::new()?;
    let sock = stream.as_raw_fd();
    while session.remaining() > 0 {
        let count = session.next_chunk(ZERO_COPY_CHUNK);
        let io = stream.async_io(Interest::READABLE, || splice_socket_to_pipe(sock, &pipe, count));
        let n = session.step("splice", io).await?;
        if n == 0 {
            return Err(Error::incomplete(
                session.moved(),
                session.total(),
                "connection closed before all bytes arrived",
            ));
        }
        splice_pipe_to_file(&pipe, file, session.moved(), n)?;
        session.advance(n as u64);
    }
    session.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn session(total: u64, stall_ms: u64) -> TransferSession {
        TransferSession::new(
            TransferMode::Normal,
            total,
            StallPolicy {
                max_stall: Duration::from_millis(stall_ms),
            },
            CancellationToken::new(),
        )
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("zero".parse::<TransferMode>().unwrap(), TransferMode::Zero);
        assert_eq!("normal".parse::<TransferMode>().unwrap(), TransferMode::Normal);
        assert!(matches!("ZERO".parse::<TransferMode>(), Err(Error::InvalidMode(_))));
        assert_eq!(TransferMode::Zero.to_string(), "zero");
    }

    #[tokio::test]
    async fn buffered_copies_exact_total() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut src = &data[..];
        let mut dst = Vec::new();
        let mut s = session(data.len() as u64, 500);
        let n = copy_buffered(&mut s, &mut src, &mut dst).await.unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(dst, data);
    }

    #[tokio::test]
    async fn buffered_never_reads_past_total() {
        let data = vec![7u8; 100];
        let mut src = &data[..];
        let mut dst = Vec::new();
        let mut s = session(40, 500);
        copy_buffered(&mut s, &mut src, &mut dst).await.unwrap();
        assert_eq!(dst.len(), 40);
        assert_eq!(src.len(), 60);
    }

    #[tokio::test]
    async fn early_eof_is_incomplete() {
        let data = vec![1u8; 10];
        let mut src = &data[..];
        let mut dst = Vec::new();
        let mut s = session(50, 500);
        let err = copy_buffered(&mut s, &mut src, &mut dst).await.unwrap_err();
        assert!(matches!(err, Error::IncompleteTransfer { moved: 10, total: 50, .. }));
    }

    #[tokio::test]
    async fn stalled_source_is_incomplete() {
        let (_peer, mut src) = duplex(64);
        let mut dst = Vec::new();
        let mut s = session(10, 50);
        let err = copy_buffered(&mut s, &mut src, &mut dst).await.unwrap_err();
        assert!(matches!(err, Error::IncompleteTransfer { moved: 0, .. }));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stall() {
        let (_peer, mut src) = duplex(64);
        let mut dst = Vec::new();
        let token = CancellationToken::new();
        let mut s = TransferSession::new(
            TransferMode::Normal,
            10,
            StallPolicy {
                max_stall: Duration::from_secs(30),
            },
            token.clone(),
        );
        token.cancel();
        let err = copy_buffered(&mut s, &mut src, &mut dst).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { moved: 0, total: 10 }));
    }

    #[tokio::test]
    async fn resumes_from_offset() {
        let data = vec![9u8; 30];
        let mut src = &data[..];
        let mut dst = Vec::new();
        let mut s = session(40, 500);
        s.advance(10);
        let n = copy_buffered(&mut s, &mut src, &mut dst).await.unwrap();
        assert_eq!(n, 40);
        assert_eq!(dst.len(), 30);
    }
}
