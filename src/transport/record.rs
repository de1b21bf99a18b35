//! Length-prefixed records over a byte stream.
//!
//! Wire format: `length (4, BE) | body (length bytes)`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::error::{Error, Result};
use crate::transport::{MessageSink, MessageSource};

/// Largest record body accepted from the wire.
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Record header size.
const RECORD_HEADER_SIZE: usize = 4;

/// Split a byte stream into record halves.
pub fn split<S>(stream: S) -> (RecordReader<ReadHalf<S>>, RecordWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (RecordReader::new(read_half), RecordWriter::new(write_half))
}

/// Reads records from a byte stream.
pub struct RecordReader<R> {
    inner: R,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Wrap a readable stream.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R> MessageSource for RecordReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        // Only EOF on a record boundary is an orderly end.
        let mut header = [0u8; RECORD_HEADER_SIZE];
        let mut filled = 0;
        while filled < RECORD_HEADER_SIZE {
            match self.inner.read(&mut header[filled..]).await? {
                0 if filled == 0 => return Ok(None),
                0 => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "truncated record header: {} of {} bytes",
                            filled, RECORD_HEADER_SIZE
                        ),
                    )))
                }
                n => filled += n,
            }
        }

        let length = u32::from_be_bytes(header) as usize;
        if length > MAX_RECORD_SIZE {
            return Err(Error::frame(format!("record too large: {} bytes", length)));
        }

        let mut body = vec![0u8; length];
        self.inner.read_exact(&mut body).await?;

        Ok(Some(Bytes::from(body)))
    }
}

/// Writes records to a byte stream.
pub struct RecordWriter<W> {
    inner: W,
}

impl<W> RecordWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a writable stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W> MessageSink for RecordWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, msg: Bytes) -> Result<()> {
        if msg.len() > MAX_RECORD_SIZE {
            return Err(Error::frame(format!("record too large: {} bytes", msg.len())));
        }

        let header = (msg.len() as u32).to_be_bytes();
        self.inner.write_all(&header).await?;
        self.inner.write_all(&msg).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
