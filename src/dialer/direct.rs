//! Direct outbound TCP.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::dialer::{BoxedStream, Dialer};
use crate::error::{Error, Result};

/// Default outbound connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials destinations with a raw TCP connection.
#[derive(Debug, Clone)]
pub struct DirectDialer {
    connect_timeout: Duration,
}

impl DirectDialer {
    /// Create a dialer with the default timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create a dialer with a custom connect timeout.
    pub fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Resolve and connect, returning the concrete stream.
    pub async fn connect(&self, network: &str, address: &str) -> Result<TcpStream> {
        let want: fn(&SocketAddr) -> bool = match network {
            "tcp" => |_| true,
            "tcp4" => SocketAddr::is_ipv4,
            "tcp6" => SocketAddr::is_ipv6,
            other => return Err(Error::Unsupported(other.to_string())),
        };

        let addrs: Vec<SocketAddr> = lookup_host(address)
            .await
            .map_err(|e| Error::address(format!("{}: {}", address, e)))?
            .filter(want)
            .collect();

        if addrs.is_empty() {
            return Err(Error::address(format!("no {} address for {}", network, address)));
        }

        let mut last_err = None;
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = Some(Error::Io(e)),
                Err(_) => last_err = Some(Error::Timeout(self.connect_timeout.as_millis() as u64)),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::dial_failed(address)))
    }
}

impl Default for DirectDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream> {
        let stream = self.connect(network, address).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_direct_dial_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let mut stream = DirectDialer::new().dial("tcp", &addr.to_string()).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_unsupported_network() {
        let result = DirectDialer::new().dial("udp", "127.0.0.1:53").await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_family_filter() {
        let result = DirectDialer::new().connect("tcp6", "127.0.0.1:80").await;
        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = DirectDialer::new().dial("tcp", &addr.to_string()).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
