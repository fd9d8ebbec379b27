//! Newline framing for the control channel.
//!
//! Reads are buffered and the delimiter is scanned in memory. Bytes that
//! arrive after the last delimiter stay in the buffer; `into_parts` hands
//! them to whoever consumes the raw payload next.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::MAX_LINE_LEN;

const READ_CHUNK: usize = 1024;

pub struct LineStream<S> {
    stream: S,
    buf: Vec<u8>,
    io_timeout: Option<Duration>,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
            io_timeout: None,
        }
    }

    /// Bound every subsequent line read and write by `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.io_timeout = Some(limit);
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Bytes buffered past the last returned line.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.stream, self.buf)
    }

    /// Read one line. `Ok(None)` means the peer closed the stream before
    /// sending anything; a partial line at end-of-stream is returned as is.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        match self.io_timeout {
            Some(limit) => match timeout(limit, self.read_line_inner()).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout("line read", limit.as_millis() as u64)),
            },
            None => self.read_line_inner().await,
        }
    }

    async fn read_line_inner(&mut self) -> Result<Option<String>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + pos;
                let raw: Vec<u8> = self.buf.drain(..=end).collect();
                return decode(&raw[..end]).map(Some);
            }
            scanned = self.buf.len();
            if scanned > MAX_LINE_LEN {
                return Err(Error::ProtocolViolation(format!(
                    "line exceeds {} bytes",
                    MAX_LINE_LEN
                )));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let raw = std::mem::take(&mut self.buf);
                return decode(&raw).map(Some);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Write `text` followed by `\n`, looping over partial writes.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        let mut msg = Vec::with_capacity(text.len() + 1);
        msg.extend_from_slice(text.as_bytes());
        msg.push(b'\n');
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(&msg).await?;
            stream.flush().await
        };
        match self.io_timeout {
            Some(limit) => match timeout(limit, write).await {
                Ok(res) => Ok(res?),
                Err(_) => Err(Error::Timeout("line write", limit.as_millis() as u64)),
            },
            None => Ok(write.await?),
        }
    }
}

fn decode(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::ProtocolViolation("line is not valid UTF-8".into()))?;
    Ok(text.replace('\r', "").trim().to_string())
}
