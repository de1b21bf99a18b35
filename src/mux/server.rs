//! Multiplexer server role.
//!
//! Receives frames from a client, dials the requested destinations through a
//! [`Dialer`] and relays bytes back tagged with the client's identifier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::dialer::{BoxedStream, Dialer};
use crate::error::{Error, Result};
use crate::mux::frame::{parse_target, Control, Frame, StreamId, MAX_FRAME_PAYLOAD};
use crate::mux::stats::{MuxStats, StatsSnapshot};
use crate::mux::table::ConnTable;
use crate::mux::writer::{spawn_writer, FrameSender};
use crate::mux::MuxConfig;
use crate::transport::{self, websocket, MessageSink, MessageSource};

/// Table entry for one outbound connection.
#[derive(Clone)]
struct ServerConn {
    /// Payloads waiting to be written to the destination
    data_tx: mpsc::Sender<Bytes>,
    /// Distinguishes this registration from a later one under the same id
    serial: u64,
}

/// Per-transport state.
struct Session {
    dialer: Arc<dyn Dialer>,
    table: ConnTable<ServerConn>,
    frames: FrameSender,
    stats: Arc<MuxStats>,
    endpoint_buffer: usize,
    next_serial: AtomicU64,
}

impl Session {
    async fn dispatch(self: &Arc<Self>, msg: Bytes) {
        let frame = match Frame::decode(msg) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("dropping malformed frame: {}", e);
                self.stats.increment_dropped();
                return;
            }
        };
        self.stats.record_received(frame.payload.len());

        match frame.control {
            Control::Connecting => self.open(frame.id, &frame.payload).await,
            Control::Data => {
                let Some(conn) = self.table.get(frame.id) else {
                    tracing::debug!("data for unknown endpoint {}", frame.id);
                    self.stats.increment_dropped();
                    self.reply(Frame::closed(frame.id)).await;
                    return;
                };
                if conn.data_tx.send(frame.payload).await.is_err() {
                    self.stats.increment_dropped();
                }
            }
            Control::Closed => {
                // Dropping the sender lets the connection task drain and finish.
                if self.table.remove(frame.id).is_some() {
                    tracing::debug!("endpoint {} closed by client", frame.id);
                } else {
                    self.stats.increment_dropped();
                }
            }
            Control::ConnectionSuccess => {
                tracing::debug!("ignoring connection-success for {} on server side", frame.id);
                self.stats.increment_dropped();
            }
        }
    }

    async fn open(self: &Arc<Self>, id: StreamId, payload: &[u8]) {
        let (network, address) = match parse_target(payload) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!("endpoint {} rejected: {}", id, e);
                self.stats.increment_dial_failures();
                self.reply(Frame::closed(id)).await;
                return;
            }
        };

        let (data_tx, data_rx) = mpsc::channel(self.endpoint_buffer.max(1));
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        if !self.table.insert_new(id, ServerConn { data_tx, serial }) {
            tracing::debug!("duplicate connecting frame for live endpoint {}", id);
            self.stats.increment_dropped();
            return;
        }

        // Dial off the dispatch loop; data arriving meanwhile queues in data_rx.
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.connect(id, serial, network, address, data_rx).await;
        });
    }

    async fn connect(
        &self,
        id: StreamId,
        serial: u64,
        network: String,
        address: String,
        data_rx: mpsc::Receiver<Bytes>,
    ) {
        let stream = match self.dialer.dial(&network, &address).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!("endpoint {} dial {}://{} failed: {}", id, network, address, e);
                self.stats.increment_dial_failures();
                if self.unregister(id, serial) {
                    self.reply(Frame::closed(id)).await;
                }
                return;
            }
        };

        // The client may have given up while we were dialing.
        if !self.is_registered(id, serial) {
            tracing::debug!("endpoint {} closed before dial completed", id);
            return;
        }

        if self.frames.send(Frame::connection_success(id)).await.is_err() {
            return;
        }
        self.stats.increment_opened();
        tracing::debug!("endpoint {} connected to {}://{}", id, network, address);

        let (reader, writer) = tokio::io::split(stream);
        tokio::select! {
            _ = pump_in(id, reader, self.frames.clone()) => {
                // Destination finished first; tell the client unless it already closed.
                if self.unregister(id, serial) {
                    self.reply(Frame::closed(id)).await;
                }
            }
            _ = pump_out(id, writer, data_rx) => {}
        }

        self.stats.increment_closed();
        tracing::debug!("endpoint {} finished", id);
    }

    fn is_registered(&self, id: StreamId, serial: u64) -> bool {
        self.table.get(id).is_some_and(|conn| conn.serial == serial)
    }

    fn unregister(&self, id: StreamId, serial: u64) -> bool {
        self.table.remove_if(id, |conn| conn.serial == serial).is_some()
    }

    async fn reply(&self, frame: Frame) {
        if self.frames.send(frame).await.is_err() {
            tracing::debug!("transport writer gone, reply dropped");
        }
    }
}

/// Destination → client.
async fn pump_in(id: StreamId, mut reader: ReadHalf<BoxedStream>, frames: FrameSender) {
    let mut buf = vec![0u8; MAX_FRAME_PAYLOAD];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let frame = Frame::data(id, Bytes::copy_from_slice(&buf[..n]));
                if frames.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("endpoint {} destination read failed: {}", id, e);
                break;
            }
        }
    }
}

/// Client → destination. Ends when the client closes the endpoint.
async fn pump_out(
    id: StreamId,
    mut writer: WriteHalf<BoxedStream>,
    mut data_rx: mpsc::Receiver<Bytes>,
) {
    let mut failed = false;
    while let Some(data) = data_rx.recv().await {
        if failed {
            continue;
        }
        if let Err(e) = writer.write_all(&data).await {
            // The reader side notices the broken socket and tears down.
            tracing::debug!("endpoint {} destination write failed: {}", id, e);
            failed = true;
        }
    }
    let _ = writer.shutdown().await;
}

/// Server side of a multiplexed transport.
///
/// One instance can serve any number of transports; statistics are
/// aggregated across all of them.
#[derive(Clone)]
pub struct MuxServer {
    dialer: Arc<dyn Dialer>,
    config: MuxConfig,
    stats: Arc<MuxStats>,
    websocket_path: Option<String>,
}

impl MuxServer {
    /// Create a server that reaches destinations through `dialer`.
    pub fn new(dialer: Arc<dyn Dialer>, config: MuxConfig) -> Self {
        Self {
            dialer,
            config,
            stats: Arc::new(MuxStats::new()),
            websocket_path: None,
        }
    }

    /// Accept WebSocket upgrades on `path` instead of raw record streams.
    pub fn with_websocket_path(mut self, path: impl AsRef<str>) -> Self {
        self.websocket_path = Some(websocket::normalize_path(path.as_ref()));
        self
    }

    /// Counters aggregated over every transport served.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Serve one physical transport until it closes or fails.
    ///
    /// Returns `Ok(())` when the client closes the transport cleanly. Every
    /// outbound connection opened over it is torn down before returning.
    pub async fn serve<R, W>(&self, mut source: R, sink: W) -> Result<()>
    where
        R: MessageSource,
        W: MessageSink,
    {
        let (frames, mut writer) =
            spawn_writer(sink, self.config.queue_capacity, Arc::clone(&self.stats));

        let session = Arc::new(Session {
            dialer: Arc::clone(&self.dialer),
            table: ConnTable::new(),
            frames,
            stats: Arc::clone(&self.stats),
            endpoint_buffer: self.config.endpoint_buffer,
            next_serial: AtomicU64::new(0),
        });

        let result = loop {
            tokio::select! {
                msg = source.recv() => match msg {
                    Ok(Some(msg)) => session.dispatch(msg).await,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
                res = &mut writer => break match res {
                    Ok(Ok(())) => Err(Error::TransportClosed),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::TransportClosed),
                },
            }
        };

        let orphaned = session.table.drain();
        if !orphaned.is_empty() {
            tracing::debug!("dropping {} live endpoints", orphaned.len());
        }
        writer.abort();

        result
    }

    /// Serve one TCP connection carrying length-prefixed records.
    pub async fn serve_stream(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let (reader, writer) = transport::split(stream);
        self.serve(reader, writer).await
    }

    /// Upgrade one TCP connection to WebSocket on `path` and serve it.
    pub async fn serve_websocket(&self, stream: TcpStream, path: &str) -> Result<()> {
        let (reader, writer) = websocket::accept(stream, path).await?;
        self.serve(reader, writer).await
    }

    /// Bind `addr` and serve every accepted connection.
    pub async fn listen(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        match &self.websocket_path {
            Some(path) => tracing::info!(
                "multiplexer server listening on ws://{}{}",
                listener.local_addr()?,
                path
            ),
            None => tracing::info!("multiplexer server listening on {}", listener.local_addr()?),
        }
        self.run(listener).await
    }

    /// Accept loop over an already bound listener.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("accept error: {}", e);
                    continue;
                }
            };

            tracing::info!("transport from {}", peer_addr);
            let server = self.clone();
            tokio::spawn(async move {
                let served = match &server.websocket_path {
                    Some(path) => server.serve_websocket(stream, path).await,
                    None => server.serve_stream(stream).await,
                };
                match served {
                    Ok(()) => tracing::info!("transport from {} closed", peer_addr),
                    Err(e) => tracing::warn!("transport from {} failed: {}", peer_addr, e),
                }
            });
        }
    }
}
