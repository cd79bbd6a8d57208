//! Record transports beneath the dispatcher.
//!
//! A transport moves whole JSON records; the dispatcher never sees framing.
//! Two bindings are provided:
//!
//! - [`LengthPrefixedReader`]/[`LengthPrefixedWriter`]: browser native
//!   messaging framing (4-byte native-endian length, then the record) over
//!   any byte stream, such as stdio or a Unix socket.
//! - [`channel_transport`]: an in-process, message-oriented pair on tokio
//!   channels.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::protocol::{WireRequest, WireResponse};

/// Largest frame accepted by default (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Buffered records per direction of a channel transport.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("transport closed")]
    Closed,

    #[error("bad record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Inbound half of a transport.
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, or `None` at end of stream.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait RecordSink: Send {
    async fn send(&mut self, record: Vec<u8>) -> Result<(), TransportError>;
}

/// Reads length-prefixed records.
#[derive(Debug)]
pub struct LengthPrefixedReader<R> {
    inner: R,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin + Send> LengthPrefixedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_frame: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> RecordSource for LengthPrefixedReader<R> {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        // Only EOF before the first header byte is a clean end of stream.
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {filled} of 4 header bytes"),
                )
                .into());
            }
            filled += n;
        }
        let len = u32::from_ne_bytes(header) as usize;
        if len > self.max_frame {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }
        let mut record = vec![0u8; len];
        self.inner.read_exact(&mut record).await?;
        Ok(Some(record))
    }
}

/// Writes length-prefixed records.
#[derive(Debug)]
pub struct LengthPrefixedWriter<W> {
    inner: W,
    max_frame: usize,
}

impl<W: AsyncWrite + Unpin + Send> LengthPrefixedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            max_frame: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RecordSink for LengthPrefixedWriter<W> {
    async fn send(&mut self, record: Vec<u8>) -> Result<(), TransportError> {
        let len = record.len();
        let header = u32::try_from(len)
            .ok()
            .filter(|_| len <= self.max_frame)
            .ok_or(TransportError::FrameTooLarge {
                len,
                max: self.max_frame,
            })?;
        self.inner.write_all(&header.to_ne_bytes()).await?;
        self.inner.write_all(&record).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Dispatcher-side receiver of a channel transport.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Dispatcher-side sender of a channel transport.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn send(&mut self, record: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(record).await.map_err(|_| TransportError::Closed)
    }
}

/// The driver's end of a channel transport.
#[derive(Debug)]
pub struct DriverEnd {
    requests: Option<mpsc::Sender<Vec<u8>>>,
    responses: mpsc::Receiver<Vec<u8>>,
}

impl DriverEnd {
    /// Send a raw record.
    pub async fn send_raw(&self, record: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        let requests = self.requests.as_ref().ok_or(TransportError::Closed)?;
        requests
            .send(record.into())
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn send(&self, req: &WireRequest) -> Result<(), TransportError> {
        self.send_raw(serde_json::to_vec(req)?).await
    }

    /// Next response, or `None` once the dispatcher side is gone.
    pub async fn recv(&mut self) -> Result<Option<WireResponse>, TransportError> {
        match self.responses.recv().await {
            Some(record) => Ok(Some(serde_json::from_slice(&record)?)),
            None => Ok(None),
        }
    }

    /// Stop sending; the dispatcher's source then reaches end of stream.
    pub fn close(&mut self) {
        self.requests = None;
    }
}

/// An in-process, message-oriented transport.
pub fn channel_transport() -> (ChannelSource, ChannelSink, DriverEnd) {
    let (req_tx, req_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (resp_tx, resp_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        ChannelSource { rx: req_rx },
        ChannelSink { tx: resp_tx },
        DriverEnd {
            requests: Some(req_tx),
            responses: resp_rx,
        },
    )
}
