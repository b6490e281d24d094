//! Transport contract the dispatcher runs against, plus the stdio variant.
//!
//! stdio framing: UTF-8 JSON, one message per line, `\n` terminated, no
//! embedded newlines. Blank lines are skipped and a trailing `\r` is tolerated.
//! stdout carries protocol frames only; logs go to stderr.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

use crate::core::mcp::{decode_message, DecodeError, Incoming, RpcResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("undecodable frame: {0}")]
    Decode(#[from] DecodeError),
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport is closed")]
    Closed,
}

/// A bidirectional message channel. Implementations take `&self` so reads and
/// writes can proceed from different tasks; the dispatcher serializes writes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Next inbound message. `Ok(None)` is end-of-stream, a clean shutdown.
    async fn read(&self) -> Result<Option<Incoming>, TransportError>;

    async fn write(&self, response: &RpcResponse) -> Result<(), TransportError>;

    /// Release underlying resources. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}

pub struct StdioTransport<R, W> {
    lines: Mutex<Lines<BufReader<R>>>,
    writer: Mutex<Option<W>>,
    closed: AtomicBool,
}

impl StdioTransport<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(reader).lines()),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read(&self) -> Result<Option<Incoming>, TransportError> {
        let mut lines = self.lines.lock().await;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            // `next_line` is cancel-safe, so the serve loop may race it in `select!`.
            let Some(line) = lines.next_line().await? else {
                return Ok(None);
            };
            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }
            tracing::trace!(len = frame.len(), "stdio frame read");
            return decode_message(frame.as_bytes()).map(Some).map_err(TransportError::from);
        }
    }

    async fn write(&self, response: &RpcResponse) -> Result<(), TransportError> {
        let line = response.to_line()?;
        debug_assert!(!line.contains('\n'), "frames must not contain embedded newlines");

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        tracing::trace!(len = line.len(), "stdio frame written");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }
}
