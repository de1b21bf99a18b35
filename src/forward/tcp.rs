//! Flows backed by kernel TCP sockets.
//!
//! Useful when something already terminates the virtual interface's TCP
//! (a transparent redirect, a local port forward) and surfaces each flow as
//! an ordinary socket.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::forward::{Flow, FlowListener};

/// A [`Flow`] over an accepted `TcpStream`.
pub struct TcpFlow {
    destination: SocketAddr,
    reader: OwnedReadHalf,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpFlow {
    /// Wrap `stream`, recording `destination` as the dial target.
    pub fn new(stream: TcpStream, destination: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            destination,
            reader,
            writer: Mutex::new(writer),
        }
    }

    /// Wrap a redirected stream whose local address is the original destination.
    pub fn redirected(stream: TcpStream) -> io::Result<Self> {
        let destination = stream.local_addr()?;
        Ok(Self::new(stream, destination))
    }
}

#[async_trait]
impl Flow for TcpFlow {
    fn destination(&self) -> SocketAddr {
        self.destination
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.try_read(buf)
    }

    async fn readable(&self) -> io::Result<()> {
        self.reader.readable().await
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.writer.lock().await.write_all(buf).await
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Accepts TCP connections and turns them into flows.
pub struct TcpFlowListener {
    listener: TcpListener,
    destination: Option<SocketAddr>,
}

impl TcpFlowListener {
    /// Flows take their destination from the accepted socket's local address.
    pub fn redirected(listener: TcpListener) -> Self {
        Self {
            listener,
            destination: None,
        }
    }

    /// Every flow is forwarded to `destination`.
    pub fn fixed(listener: TcpListener, destination: SocketAddr) -> Self {
        Self {
            listener,
            destination: Some(destination),
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl FlowListener for TcpFlowListener {
    type Flow = TcpFlow;

    async fn accept(&mut self) -> Option<TcpFlow> {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("accept error: {}", e);
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let flow = match self.destination {
                Some(destination) => Ok(TcpFlow::new(stream, destination)),
                None => TcpFlow::redirected(stream),
            };
            match flow {
                Ok(flow) => {
                    tracing::debug!("flow from {} to {}", peer_addr, flow.destination());
                    return Some(flow);
                }
                Err(e) => tracing::warn!("dropping flow from {}: {}", peer_addr, e),
            }
        }
    }
}
