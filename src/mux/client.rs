//! Multiplexer client role.
//!
//! [`MuxClient::dial`] allocates an identifier, sends `connecting` and waits
//! for the server's verdict. The returned [`Endpoint`] is an ordinary
//! `AsyncRead + AsyncWrite` stream whose writes become `data` frames.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::SendError, error::TrySendError, OwnedPermit, WeakSender};
use tokio::task::{AbortHandle, JoinHandle};

use crate::dialer::{BoxedStream, Dialer};
use crate::error::{Error, Result};
use crate::mux::frame::{Control, Frame, StreamId, MAX_FRAME_PAYLOAD};
use crate::mux::stats::{MuxStats, StatsSnapshot};
use crate::mux::table::ConnTable;
use crate::mux::writer::{spawn_writer, FrameSender};
use crate::mux::MuxConfig;
use crate::transport::{self, websocket, MessageSink, MessageSource};

/// What the dispatch loop hands to an endpoint.
#[derive(Debug)]
enum Event {
    Established,
    Data(Bytes),
}

type ReserveFuture =
    Pin<Box<dyn Future<Output = std::result::Result<OwnedPermit<Frame>, SendError<()>>> + Send>>;

/// State shared by the dispatch loop, the public handle and every endpoint.
struct Shared {
    table: ConnTable<mpsc::Sender<Event>>,
    frames: FrameSender,
    stats: Arc<MuxStats>,
    broken: AtomicBool,
    writer: AbortHandle,
    config: MuxConfig,
}

impl Shared {
    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Whether `id` still maps to the channel behind `entry`.
    ///
    /// A closed identifier can be handed to a newer dial; a stale handle
    /// must never act on that dial's entry.
    fn owns(&self, id: StreamId, entry: &WeakSender<Event>) -> bool {
        match entry.upgrade() {
            Some(tx) => self.table.get(id).is_some_and(|current| current.same_channel(&tx)),
            None => false,
        }
    }

    /// Unregister `id` if it still belongs to `entry`.
    fn release(&self, id: StreamId, entry: &WeakSender<Event>) -> bool {
        match entry.upgrade() {
            Some(tx) => self
                .table
                .remove_if(id, |current| current.same_channel(&tx))
                .is_some(),
            None => false,
        }
    }

    /// Tear the instance down. Pending endpoint reads and writes fail.
    fn fail(&self) {
        self.broken.store(true, Ordering::Release);
        let orphaned = self.table.drain();
        if !orphaned.is_empty() {
            tracing::debug!("dropping {} live endpoints", orphaned.len());
        }
        self.writer.abort();
    }

    async fn dispatch(&self, msg: Bytes) {
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
            Control::Data => self.deliver(frame.id, Event::Data(frame.payload)).await,
            Control::ConnectionSuccess => self.deliver(frame.id, Event::Established).await,
            Control::Closed => {
                if self.table.remove(frame.id).is_some() {
                    tracing::debug!("endpoint {} closed by peer", frame.id);
                } else {
                    self.stats.increment_dropped();
                }
            }
            Control::Connecting => {
                tracing::debug!("ignoring connecting frame for {} on client side", frame.id);
                self.stats.increment_dropped();
            }
        }
    }

    async fn deliver(&self, id: StreamId, event: Event) {
        let Some(tx) = self.table.get(id) else {
            self.stats.increment_dropped();
            return;
        };

        if tx.send(event).await.is_err() {
            // Endpoint went away without closing; forget it.
            self.table.remove_if(id, |current| current.same_channel(&tx));
        }
    }
}

/// Reads frames off the transport until it fails, then tears down.
async fn run_dispatch<R: MessageSource>(
    mut source: R,
    mut writer: JoinHandle<Result<()>>,
    shared: Arc<Shared>,
) {
    let reason = loop {
        tokio::select! {
            msg = source.recv() => match msg {
                Ok(Some(msg)) => shared.dispatch(msg).await,
                Ok(None) => break "transport closed by peer".to_string(),
                Err(e) => break format!("transport read failed: {}", e),
            },
            res = &mut writer => break match res {
                Ok(Ok(())) => "transport writer finished".to_string(),
                Ok(Err(e)) => format!("transport write failed: {}", e),
                Err(e) => format!("transport writer stopped: {}", e),
            },
        }
    };

    tracing::warn!("multiplexer client stopped: {}", reason);
    shared.fail();
}

struct ClientInner {
    shared: Arc<Shared>,
    dispatch: AbortHandle,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.dispatch.abort();
        self.shared.fail();
    }
}

/// Client side of a multiplexed transport.
///
/// Cloning is cheap; the transport is torn down when the last clone drops
/// or [`MuxClient::shutdown`] is called.
#[derive(Clone)]
pub struct MuxClient {
    inner: Arc<ClientInner>,
}

impl MuxClient {
    /// Start the dispatch loop and writer task over an established transport.
    pub fn new<R, W>(source: R, sink: W, config: MuxConfig) -> Self
    where
        R: MessageSource,
        W: MessageSink,
    {
        let stats = Arc::new(MuxStats::new());
        let (frames, writer) = spawn_writer(sink, config.queue_capacity, Arc::clone(&stats));

        let shared = Arc::new(Shared {
            table: ConnTable::new(),
            frames,
            stats,
            broken: AtomicBool::new(false),
            writer: writer.abort_handle(),
            config,
        });

        let dispatch = tokio::spawn(run_dispatch(source, writer, Arc::clone(&shared)));

        Self {
            inner: Arc::new(ClientInner {
                shared,
                dispatch: dispatch.abort_handle(),
            }),
        }
    }

    /// Connect to a multiplexer server.
    ///
    /// `addr` is either `host:port` (length-prefixed records over TCP) or a
    /// `ws://host:port/<secret>` URL (WebSocket binary messages).
    pub async fn connect(addr: &str, config: MuxConfig) -> Result<Self> {
        let connect_timeout = config.dial_timeout;
        if websocket::is_websocket_url(addr) {
            let (reader, writer) = websocket::connect(addr, connect_timeout).await?;
            tracing::info!("multiplexer connected to {} over websocket", addr);
            return Ok(Self::new(reader, writer, config));
        }

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(connect_timeout.as_millis() as u64))??;
        stream.set_nodelay(true)?;

        tracing::info!("multiplexer connected to {}", addr);

        let (reader, writer) = transport::split(stream);
        Ok(Self::new(reader, writer, config))
    }

    /// Open a new endpoint to `network://address` through the server.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Endpoint> {
        let shared = &self.inner.shared;
        if shared.is_broken() {
            return Err(Error::TransportClosed);
        }

        let (tx, mut rx) = mpsc::channel(shared.config.endpoint_buffer.max(1));
        let entry = tx.downgrade();
        let id = shared.table.allocate(tx);
        let mut pending = PendingDial {
            shared: &**shared,
            id,
            entry: entry.clone(),
            armed: true,
        };

        // A failure racing the allocation may have drained the table already.
        if shared.is_broken() {
            return Err(Error::TransportClosed);
        }

        shared
            .frames
            .send(Frame::connecting(id, network, address))
            .await
            .map_err(|_| Error::TransportClosed)?;

        let target = format!("{}://{}", network, address);
        let dial_timeout = shared.config.dial_timeout;

        match tokio::time::timeout(dial_timeout, rx.recv()).await {
            Ok(Some(Event::Established)) => {
                pending.armed = false;
                shared.stats.increment_opened();
                tracing::debug!("endpoint {} connected to {}", id, target);
                Ok(Endpoint::new(id, entry, Arc::clone(shared), rx))
            }
            Ok(Some(Event::Data(_))) => {
                shared.stats.increment_dial_failures();
                tracing::debug!("endpoint {} got data before connection-success", id);
                Err(Error::dial_failed(target))
            }
            Ok(None) => {
                // Entry already removed by a closed frame or a transport failure.
                pending.armed = false;
                shared.stats.increment_dial_failures();
                if shared.is_broken() {
                    Err(Error::TransportClosed)
                } else {
                    tracing::debug!("endpoint {} refused: {}", id, target);
                    Err(Error::dial_failed(target))
                }
            }
            Err(_) => {
                shared.stats.increment_dial_failures();
                tracing::debug!("endpoint {} timed out dialing {}", id, target);
                Err(Error::Timeout(dial_timeout.as_millis() as u64))
            }
        }
    }

    /// Whether the underlying transport has failed or been shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_broken()
    }

    /// Number of endpoints currently registered.
    pub fn live_endpoints(&self) -> usize {
        self.inner.shared.table.len()
    }

    /// Counters for this instance.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.shared.stats.snapshot()
    }

    /// Tear down the transport. Every live endpoint errors out.
    pub fn shutdown(&self) {
        self.inner.dispatch.abort();
        self.inner.shared.fail();
    }
}

#[async_trait]
impl Dialer for MuxClient {
    async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream> {
        let endpoint = MuxClient::dial(self, network, address).await?;
        Ok(Box::new(endpoint))
    }
}

/// Unregisters a dial that did not complete, including a cancelled one.
struct PendingDial<'a> {
    shared: &'a Shared,
    id: StreamId,
    entry: WeakSender<Event>,
    armed: bool,
}

impl Drop for PendingDial<'_> {
    fn drop(&mut self) {
        if self.armed && self.shared.release(self.id, &self.entry) {
            let _ = self.shared.frames.try_send(Frame::closed(self.id));
        }
    }
}

/// One logical connection over a [`MuxClient`].
pub struct Endpoint {
    id: StreamId,
    entry: WeakSender<Event>,
    shared: Arc<Shared>,
    rx: mpsc::Receiver<Event>,
    pending: Bytes,
    reserve: Option<ReserveFuture>,
    closed: bool,
}

impl Endpoint {
    fn new(
        id: StreamId,
        entry: WeakSender<Event>,
        shared: Arc<Shared>,
        rx: mpsc::Receiver<Event>,
    ) -> Self {
        Self {
            id,
            entry,
            shared,
            rx,
            pending: Bytes::new(),
            reserve: None,
            closed: false,
        }
    }

    /// Identifier of this endpoint on the wire.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Wait for a slot in the writer queue.
    fn poll_permit(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<OwnedPermit<Frame>>> {
        let frames = &self.shared.frames;
        let reserve = self
            .reserve
            .get_or_insert_with(|| -> ReserveFuture { Box::pin(frames.clone().reserve_owned()) });

        let result = ready!(reserve.as_mut().poll(cx));
        self.reserve = None;
        Poll::Ready(result.map_err(|_| io::Error::from(Error::TransportClosed)))
    }

    /// Mark the endpoint closed. Returns `true` if it still owned its
    /// identifier, i.e. the peer has not been told yet.
    fn finish(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.shared.stats.increment_closed();
        self.shared.release(self.id, &self.entry)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl AsyncRead for Endpoint {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(Event::Data(data)) => this.pending = data,
                Some(Event::Established) => {}
                None if this.shared.is_broken() => {
                    return Poll::Ready(Err(Error::TransportClosed.into()));
                }
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncWrite for Endpoint {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "endpoint closed",
            )));
        }
        if !this.shared.owns(this.id, &this.entry) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "endpoint closed by peer",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let permit = ready!(this.poll_permit(cx))?;
        let n = buf.len().min(MAX_FRAME_PAYLOAD);
        permit.send(Frame::data(this.id, Bytes::copy_from_slice(&buf[..n])));
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }

        if !this.shared.owns(this.id, &this.entry) {
            // Peer closed first, or the identifier already moved on.
            this.finish();
            return Poll::Ready(Ok(()));
        }

        match ready!(this.poll_permit(cx)) {
            Ok(permit) => {
                if this.finish() {
                    permit.send(Frame::closed(this.id));
                }
            }
            Err(_) => {
                this.finish();
                tracing::debug!("endpoint {} closed after transport failure", this.id);
            }
        }
        tracing::debug!("endpoint {} closed", this.id);
        Poll::Ready(Ok(()))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if !self.finish() || self.shared.is_broken() {
            return;
        }

        if let Err(TrySendError::Full(frame)) = self.shared.frames.try_send(Frame::closed(self.id)) {
            let frames = self.shared.frames.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = frames.send(frame).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    use crate::transport::{RecordReader, RecordWriter};

    /// The server end of a client under test, driven by hand.
    struct Peer {
        reader: RecordReader<ReadHalf<DuplexStream>>,
        writer: RecordWriter<WriteHalf<DuplexStream>>,
    }

    impl Peer {
        async fn recv_frame(&mut self) -> Frame {
            let msg = self.reader.recv().await.unwrap().unwrap();
            Frame::decode(msg).unwrap()
        }

        async fn recv_raw(&mut self) -> Bytes {
            self.reader.recv().await.unwrap().unwrap()
        }

        async fn send_frame(&mut self, frame: Frame) {
            self.writer.send(frame.encode()).await.unwrap();
        }
    }

    fn pair(config: MuxConfig) -> (MuxClient, Peer) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (client_reader, client_writer) = transport::split(a);
        let (reader, writer) = transport::split(b);
        (
            MuxClient::new(client_reader, client_writer, config),
            Peer { reader, writer },
        )
    }

    async fn establish(client: &MuxClient, peer: &mut Peer, address: &str) -> Endpoint {
        let dial = {
            let client = client.clone();
            let address = address.to_string();
            tokio::spawn(async move { client.dial("tcp", &address).await })
        };
        let frame = peer.recv_frame().await;
        assert_eq!(frame.control, Control::Connecting);
        peer.send_frame(Frame::connection_success(frame.id)).await;
        dial.await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_http_exchange_wire_bytes() {
        let (client, mut peer) = pair(MuxConfig::default());

        let dial = {
            let client = client.clone();
            tokio::spawn(async move { client.dial("tcp", "93.184.216.34:80").await })
        };

        let mut expected = vec![0x00, 0x00, 0x00, 0x01, 0x00];
        expected.extend_from_slice(b"tcp://93.184.216.34:80");
        assert_eq!(&peer.recv_raw().await[..], &expected[..]);

        peer.send_frame(Frame::connection_success(1)).await;
        let mut endpoint = dial.await.unwrap().unwrap();
        assert_eq!(endpoint.id(), 1);

        endpoint.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        assert_eq!(
            &peer.recv_raw().await[..],
            b"\x00\x00\x00\x01\x02GET / HTTP/1.0\r\n\r\n"
        );

        peer.send_frame(Frame::data(1, &b"HTTP/1.0 200 OK\r\n"[..])).await;
        peer.send_frame(Frame::data(1, &b"\r\nhello"[..])).await;

        let mut response = vec![0u8; 24];
        endpoint.read_exact(&mut response).await.unwrap();
        assert_eq!(&response[..], b"HTTP/1.0 200 OK\r\n\r\nhello");

        endpoint.shutdown().await.unwrap();
        assert_eq!(&peer.recv_raw().await[..], b"\x00\x00\x00\x01\x03");
        assert_eq!(client.live_endpoints(), 0);
    }

    #[tokio::test]
    async fn test_refused_dial_fails() {
        let (client, mut peer) = pair(MuxConfig::default());

        let dial = {
            let client = client.clone();
            tokio::spawn(async move { client.dial("tcp", "10.0.0.1:9").await })
        };
        let frame = peer.recv_frame().await;
        peer.send_frame(Frame::closed(frame.id)).await;

        let err = dial.await.unwrap().err().unwrap();
        assert!(matches!(err, Error::DialFailed { .. }));
        assert_eq!(client.live_endpoints(), 0);
        assert_eq!(client.stats().dial_failures, 1);
    }

    #[tokio::test]
    async fn test_peer_close_drains_then_eof() {
        let (client, mut peer) = pair(MuxConfig::default());
        let mut endpoint = establish(&client, &mut peer, "example.com:80").await;

        peer.send_frame(Frame::data(endpoint.id(), &b"tail"[..])).await;
        peer.send_frame(Frame::closed(endpoint.id())).await;

        let mut received = Vec::new();
        endpoint.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"tail");

        let err = endpoint.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_unknown_identifiers_are_dropped() {
        let (client, mut peer) = pair(MuxConfig::default());

        peer.send_frame(Frame::data(99, &b"stray"[..])).await;
        peer.send_frame(Frame::closed(77)).await;
        peer.send_frame(Frame::connection_success(55)).await;
        peer.writer.send(Bytes::from_static(b"\x00")).await.unwrap();

        let mut endpoint = establish(&client, &mut peer, "example.com:80").await;
        peer.send_frame(Frame::data(endpoint.id(), &b"ok"[..])).await;

        let mut buf = [0u8; 2];
        endpoint.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        assert!(!client.is_closed());
        assert_eq!(client.stats().frames_dropped, 4);
    }

    #[tokio::test]
    async fn test_close_emits_single_frame() {
        let (client, mut peer) = pair(MuxConfig::default());
        let mut endpoint = establish(&client, &mut peer, "example.com:80").await;
        let id = endpoint.id();

        endpoint.shutdown().await.unwrap();
        endpoint.shutdown().await.unwrap();
        drop(endpoint);

        let frame = peer.recv_frame().await;
        assert_eq!((frame.id, frame.control), (id, Control::Closed));

        // The next frame on the wire belongs to a new dial, not a second close.
        let _second = establish(&client, &mut peer, "example.com:81").await;
        assert_eq!(client.stats().endpoints_closed, 1);
    }

    #[tokio::test]
    async fn test_stale_endpoint_leaves_reused_id_alone() {
        let (client, mut peer) = pair(MuxConfig::default());
        let mut stale = establish(&client, &mut peer, "example.com:80").await;
        assert_eq!(stale.id(), 1);

        peer.send_frame(Frame::closed(1)).await;
        let mut received = Vec::new();
        stale.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        // Wrap the counter so the next dial reuses identifier 1.
        client.inner.shared.table.set_next_id(0);
        let mut fresh = establish(&client, &mut peer, "example.com:81").await;
        assert_eq!(fresh.id(), 1);

        let err = stale.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        stale.shutdown().await.unwrap();
        drop(stale);
        assert_eq!(client.live_endpoints(), 1);

        // Nothing from the stale handle reached the wire.
        fresh.write_all(b"ping").await.unwrap();
        let frame = peer.recv_frame().await;
        assert_eq!((frame.id, frame.control), (1, Control::Data));
        assert_eq!(&frame.payload[..], b"ping");

        peer.send_frame(Frame::data(1, &b"pong"[..])).await;
        let mut buf = [0u8; 4];
        fresh.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_drop_without_close_sends_closed() {
        let (client, mut peer) = pair(MuxConfig::default());
        let endpoint = establish(&client, &mut peer, "example.com:80").await;
        let id = endpoint.id();

        drop(endpoint);

        let frame = peer.recv_frame().await;
        assert_eq!((frame.id, frame.control), (id, Control::Closed));
        assert_eq!(client.live_endpoints(), 0);
    }

    #[tokio::test]
    async fn test_dial_timeout_unregisters() {
        let config = MuxConfig {
            dial_timeout: Duration::from_millis(50),
            ..MuxConfig::default()
        };
        let (client, mut peer) = pair(config);

        let err = client.dial("tcp", "192.0.2.1:80").await.err().unwrap();
        assert!(matches!(err, Error::Timeout(50)));
        assert_eq!(client.live_endpoints(), 0);

        let connecting = peer.recv_frame().await;
        let closed = peer.recv_frame().await;
        assert_eq!(connecting.control, Control::Connecting);
        assert_eq!((closed.id, closed.control), (connecting.id, Control::Closed));
    }

    #[tokio::test]
    async fn test_concurrent_dials_get_distinct_ids() {
        let (client, mut peer) = pair(MuxConfig::default());

        let dials: Vec<_> = (0..32)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.dial("tcp", &format!("10.0.0.{}:80", i)).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for _ in 0..32 {
            let frame = peer.recv_frame().await;
            assert!(ids.insert(frame.id), "duplicate id {}", frame.id);
            peer.send_frame(Frame::connection_success(frame.id)).await;
        }

        let mut endpoints = Vec::new();
        for dial in dials {
            endpoints.push(dial.await.unwrap().unwrap());
        }
        let endpoint_ids: HashSet<_> = endpoints.iter().map(Endpoint::id).collect();
        assert_eq!(endpoint_ids, ids);
        assert_eq!(client.live_endpoints(), 32);
    }

    #[tokio::test]
    async fn test_transport_failure_unblocks_endpoints() {
        let (client, mut peer) = pair(MuxConfig::default());
        let mut endpoint = establish(&client, &mut peer, "example.com:80").await;

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            endpoint.read(&mut buf).await
        });

        drop(peer);

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(client.is_closed());
        assert!(matches!(
            client.dial("tcp", "example.com:80").await,
            Err(Error::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_dial() {
        let (client, mut peer) = pair(MuxConfig::default());

        let dial = {
            let client = client.clone();
            tokio::spawn(async move { client.dial("tcp", "example.com:80").await })
        };
        let _ = peer.recv_frame().await;

        client.shutdown();
        assert!(matches!(dial.await.unwrap(), Err(Error::TransportClosed)));
    }
}
