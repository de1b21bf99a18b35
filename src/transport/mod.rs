//! Physical transport underneath the multiplexer.
//!
//! The multiplexer only needs reliable, ordered delivery of whole messages.
//! It is written against the two halves below so any message-oriented socket
//! can carry it. [`record`] provides length-prefixed records over a plain
//! byte stream and [`websocket`] carries one frame per binary message.
//!
//! ```text
//! MuxClient ── Frame ─► MessageSink ═══ transport ═══ MessageSource ─► MuxServer
//!           ◄─ Frame ── MessageSource ═════════════ MessageSink ◄──
//! ```

pub mod record;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use record::{split, RecordReader, RecordWriter, MAX_RECORD_SIZE};
pub use websocket::{WsReader, WsWriter};

/// Receiving half of a message transport.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Receive the next message; `Ok(None)` on orderly end of stream.
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// Sending half of a message transport.
#[async_trait]
pub trait MessageSink: Send + 'static {
    /// Send one message atomically.
    async fn send(&mut self, msg: Bytes) -> Result<()>;

    /// Flush and close the sending direction.
    async fn close(&mut self) -> Result<()>;
}
