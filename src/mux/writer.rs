//! Single writer task per physical transport.
//!
//! ```text
//! Endpoint 1 ─┐
//! Endpoint 2 ─┼─► mpsc::Sender<Frame> (bounded) ─► writer task ─► MessageSink
//! Dispatch   ─┘
//! ```
//!
//! Every frame is encoded and sent as one message by the one task that owns
//! the sink, so the bytes of two frames never interleave. When the queue is
//! full, producers wait in `send().await`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::mux::frame::Frame;
use crate::mux::stats::MuxStats;
use crate::transport::MessageSink;

/// Producer side of the writer queue.
pub type FrameSender = mpsc::Sender<Frame>;

/// Spawn the writer task for `sink`.
///
/// The task ends with `Ok(())` once every [`FrameSender`] is dropped, or with
/// the first transport error.
pub fn spawn_writer<S>(
    sink: S,
    capacity: usize,
    stats: Arc<MuxStats>,
) -> (FrameSender, JoinHandle<Result<()>>)
where
    S: MessageSink,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(run_writer(sink, rx, stats));
    (tx, handle)
}

async fn run_writer<S: MessageSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<Frame>,
    stats: Arc<MuxStats>,
) -> Result<()> {
    while let Some(frame) = rx.recv().await {
        let payload_len = frame.payload.len();
        sink.send(frame.encode()).await?;
        stats.record_sent(payload_len);
    }

    tracing::debug!("frame queue closed, shutting down transport writer");
    let _ = sink.close().await;
    Ok(())
}
