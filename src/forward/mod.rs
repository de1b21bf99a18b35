//! Flow forwarding.
//!
//! A network stack hands over accepted TCP flows; each one is dialed through
//! a [`Dialer`] and spliced against the upstream stream until both
//! directions are done.
//!
//! ```text
//! FlowListener ─► Flow ─► forward() ─► Dialer::dial("tcp", destination)
//!                   ▲                         │
//!                   └──── splice (two copies) ┘
//! ```
//!
//! Flow reads are non-blocking: a would-block read parks the copy on the
//! flow's readiness future instead of spinning.

mod tcp;

pub use tcp::{TcpFlow, TcpFlowListener};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};

use crate::dialer::Dialer;
use crate::error::Result;

/// Copy buffer size for both splice directions.
pub const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// One accepted virtual TCP connection.
///
/// Every method takes `&self` so both splice directions can drive the flow
/// at the same time.
#[async_trait]
pub trait Flow: Send + Sync + 'static {
    /// Original destination of the flow; this is what gets dialed.
    fn destination(&self) -> SocketAddr;

    /// Read without blocking. `WouldBlock` means no data yet; `Ok(0)` is EOF.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Resolve once the flow may be readable. Wakeups can be spurious.
    async fn readable(&self) -> io::Result<()>;

    /// Write the whole buffer to the flow.
    async fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Close the sending direction of the flow.
    async fn shutdown(&self) -> io::Result<()>;
}

/// Source of newly accepted flows.
#[async_trait]
pub trait FlowListener: Send {
    type Flow: Flow;

    /// Next accepted flow, or `None` once the stack is gone.
    async fn accept(&mut self) -> Option<Self::Flow>;
}

#[async_trait]
impl<F: Flow> FlowListener for mpsc::Receiver<F> {
    type Flow = F;

    async fn accept(&mut self) -> Option<F> {
        self.recv().await
    }
}

/// Bytes moved by one splice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpliceStats {
    /// Flow → upstream
    pub sent: u64,
    /// Upstream → flow
    pub received: u64,
}

/// Dial the flow's destination and splice until either side closes.
///
/// The first direction to finish releases the other, and both ends are
/// closed on return. A failed dial drops the flow and returns the error;
/// nothing is retried.
pub async fn forward<F, D>(flow: F, dialer: &D) -> Result<SpliceStats>
where
    F: Flow,
    D: Dialer + ?Sized,
{
    let target = flow.destination().to_string();
    let upstream = dialer.dial("tcp", &target).await?;
    tracing::debug!("flow to {} connected", target);

    let (mut up_read, mut up_write) = tokio::io::split(upstream);
    let flow_done = Notify::new();
    let upstream_done = Notify::new();
    let mut sent = 0u64;
    let mut received = 0u64;

    let outbound = async {
        tokio::select! {
            _ = copy_from_flow(&flow, &mut up_write, &mut sent) => {}
            _ = upstream_done.notified() => {}
        }
        let _ = up_write.shutdown().await;
        flow_done.notify_one();
    };

    let inbound = async {
        tokio::select! {
            _ = copy_to_flow(&mut up_read, &flow, &mut received) => {}
            _ = flow_done.notified() => {}
        }
        let _ = flow.shutdown().await;
        upstream_done.notify_one();
    };

    tokio::join!(outbound, inbound);
    drop((up_read, up_write));

    tracing::debug!(
        "flow to {} finished: {} bytes sent, {} bytes received",
        target,
        sent,
        received
    );
    Ok(SpliceStats { sent, received })
}

async fn copy_from_flow<F, W>(flow: &F, upstream: &mut W, sent: &mut u64)
where
    F: Flow,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        match flow.try_read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = upstream.write_all(&buf[..n]).await {
                    tracing::debug!("upstream write failed: {}", e);
                    break;
                }
                *sent += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if let Err(e) = flow.readable().await {
                    tracing::debug!("flow readiness failed: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("flow read failed: {}", e);
                break;
            }
        }
    }
}

async fn copy_to_flow<R, F>(upstream: &mut R, flow: &F, received: &mut u64)
where
    R: AsyncRead + Unpin,
    F: Flow,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        match upstream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = flow.write_all(&buf[..n]).await {
                    tracing::debug!("flow write failed: {}", e);
                    break;
                }
                *received += n as u64;
            }
            Err(e) => {
                tracing::debug!("upstream read failed: {}", e);
                break;
            }
        }
    }
}

/// Forward every flow from `listener` through `dialer`, one task per flow.
///
/// Returns when the listener is exhausted; flows already accepted keep
/// running in their tasks.
pub async fn serve_flows<L, D>(mut listener: L, dialer: Arc<D>)
where
    L: FlowListener,
    D: Dialer + ?Sized + 'static,
{
    while let Some(flow) = listener.accept().await {
        let dialer = Arc::clone(&dialer);
        tokio::spawn(async move {
            let destination = flow.destination();
            match forward(flow, &*dialer).await {
                Ok(_) => {}
                Err(e) if e.is_transport_failure() => {
                    tracing::warn!("forward to {} failed: {}", destination, e);
                }
                Err(e) => tracing::debug!("forward to {} failed: {}", destination, e),
            }
        });
    }
    tracing::info!("flow listener closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::{Bytes, BytesMut};
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;

    use crate::dialer::BoxedStream;
    use crate::error::Error;

    /// In-memory flow whose inbound bytes are fed by the test.
    struct MockFlow {
        destination: SocketAddr,
        inbound: Mutex<(VecDeque<Bytes>, bool)>,
        ready: Notify,
        written: Mutex<BytesMut>,
        shut: AtomicBool,
        polls: AtomicUsize,
    }

    impl MockFlow {
        fn new(destination: &str) -> Arc<Self> {
            Arc::new(Self {
                destination: destination.parse().unwrap(),
                inbound: Mutex::new((VecDeque::new(), false)),
                ready: Notify::new(),
                written: Mutex::new(BytesMut::new()),
                shut: AtomicBool::new(false),
                polls: AtomicUsize::new(0),
            })
        }

        fn push(&self, data: &'static [u8]) {
            self.inbound.lock().0.push_back(Bytes::from_static(data));
            self.ready.notify_one();
        }

        fn finish(&self) {
            self.inbound.lock().1 = true;
            self.ready.notify_one();
        }
    }

    #[async_trait]
    impl Flow for Arc<MockFlow> {
        fn destination(&self) -> SocketAddr {
            self.destination
        }

        fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
            self.polls.fetch_add(1, Ordering::Relaxed);
            let mut inbound = self.inbound.lock();
            match inbound.0.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        let rest = chunk.split_off(n);
                        inbound.0.push_front(rest);
                    }
                    Ok(n)
                }
                None if inbound.1 => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        async fn readable(&self) -> io::Result<()> {
            self.ready.notified().await;
            Ok(())
        }

        async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
            self.written.lock().extend_from_slice(buf);
            Ok(())
        }

        async fn shutdown(&self) -> io::Result<()> {
            self.shut.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out one end of a prepared duplex pipe per dial.
    struct PipeDialer {
        pipes: Mutex<Vec<DuplexStream>>,
        dialed: Mutex<Vec<String>>,
    }

    impl PipeDialer {
        fn new(pipes: Vec<DuplexStream>) -> Self {
            Self {
                pipes: Mutex::new(pipes),
                dialed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Dialer for PipeDialer {
        async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream> {
            self.dialed.lock().push(format!("{}://{}", network, address));
            match self.pipes.lock().pop() {
                Some(pipe) => Ok(Box::new(pipe)),
                None => Err(Error::dial_failed(address)),
            }
        }
    }

    #[tokio::test]
    async fn test_forward_relays_both_directions() {
        let (near, mut far) = tokio::io::duplex(1024);
        let dialer = PipeDialer::new(vec![near]);
        let flow = MockFlow::new("93.184.216.34:80");

        let task = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move {
                let result = forward(flow, &dialer).await;
                (result, dialer)
            })
        };

        flow.push(b"GET / HTTP/1.0\r\n\r\n");
        let mut request = vec![0u8; 18];
        far.read_exact(&mut request).await.unwrap();
        assert_eq!(&request[..], b"GET / HTTP/1.0\r\n\r\n");

        far.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
        drop(far);

        let (result, dialer) = task.await.unwrap();
        assert_eq!(result.unwrap(), SpliceStats { sent: 18, received: 19 });
        assert_eq!(&flow.written.lock()[..], b"HTTP/1.0 200 OK\r\n\r\n");
        assert!(flow.shut.load(Ordering::Relaxed));
        assert_eq!(*dialer.dialed.lock(), vec!["tcp://93.184.216.34:80".to_string()]);
    }

    #[tokio::test]
    async fn test_flow_eof_releases_open_upstream() {
        let (near, mut far) = tokio::io::duplex(1024);
        let dialer = PipeDialer::new(vec![near]);
        let flow = MockFlow::new("10.0.0.2:7");

        let task = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { forward(flow, &dialer).await })
        };

        flow.push(b"bye");
        flow.finish();

        // Upstream reads the last bytes but never hangs up on its own.
        let mut last = [0u8; 3];
        far.read_exact(&mut last).await.unwrap();
        assert_eq!(&last, b"bye");

        let stats = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("splice released after flow eof")
            .unwrap()
            .unwrap();
        assert_eq!(stats, SpliceStats { sent: 3, received: 0 });
        assert!(flow.shut.load(Ordering::Relaxed));

        // Both halves of the upstream are gone.
        let mut rest = Vec::new();
        far.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(far.write_all(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_upstream_end_releases_idle_flow() {
        let (near, far) = tokio::io::duplex(1024);
        let dialer = PipeDialer::new(vec![near]);
        let flow = MockFlow::new("10.0.0.3:443");

        let task = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { forward(flow, &dialer).await })
        };

        // Let the outbound copy park on readiness, then hang up upstream.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(far);

        let stats = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("splice released")
            .unwrap()
            .unwrap();
        assert_eq!(stats, SpliceStats::default());
        // Parked on readiness, not spinning on try_read.
        assert!(flow.polls.load(Ordering::Relaxed) <= 2);
    }

    #[tokio::test]
    async fn test_dial_failure_aborts_flow() {
        let dialer = PipeDialer::new(Vec::new());
        let flow = MockFlow::new("10.0.0.4:22");

        let result = forward(Arc::clone(&flow), &dialer).await;
        assert!(matches!(result, Err(Error::DialFailed { .. })));
        assert!(flow.written.lock().is_empty());
    }

    #[tokio::test]
    async fn test_serve_flows_spawns_per_flow() {
        let (near_a, mut far_a) = tokio::io::duplex(1024);
        let (near_b, mut far_b) = tokio::io::duplex(1024);
        let dialer = Arc::new(PipeDialer::new(vec![near_a, near_b]));

        let (tx, rx) = mpsc::channel(4);
        let server = tokio::spawn(serve_flows(rx, Arc::clone(&dialer)));

        let first = MockFlow::new("10.0.0.5:80");
        let second = MockFlow::new("10.0.0.6:80");
        tx.send(Arc::clone(&first)).await.unwrap();
        tx.send(Arc::clone(&second)).await.unwrap();
        drop(tx);
        server.await.unwrap();

        first.push(b"one");
        second.push(b"two");

        let mut a = [0u8; 3];
        let mut b = [0u8; 3];
        far_a.read_exact(&mut a).await.unwrap();
        far_b.read_exact(&mut b).await.unwrap();

        let mut got = vec![a, b];
        got.sort();
        assert_eq!(got, vec![*b"one", *b"two"]);
        assert_eq!(dialer.dialed.lock().len(), 2);
    }
}
