//! Upstream dial strategies.
//!
//! The flow forwarder only knows the [`Dialer`] capability. Three
//! implementations ship with the crate:
//!
//! - [`DirectDialer`]: plain outbound TCP
//! - [`Socks5Dialer`]: CONNECT through a SOCKS5 proxy
//! - [`MuxClient`](crate::mux::MuxClient): an endpoint over a shared tunnel

mod direct;
mod socks5;

pub use direct::DirectDialer;
pub use socks5::{Socks5Auth, Socks5Dialer};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Byte stream returned by a dialer.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned upstream stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Produces an upstream byte stream for a `(network, address)` pair.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `address` over `network` (`"tcp"`, `"tcp4"`, `"tcp6"`).
    async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream>;
}

#[async_trait]
impl<D> Dialer for Arc<D>
where
    D: Dialer + ?Sized,
{
    async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream> {
        (**self).dial(network, address).await
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals.
pub(crate) fn split_host_port(address: &str) -> Result<(&str, u16)> {
    use crate::error::Error;

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::address(format!("missing port in {:?}", address)))?;

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::address(format!("invalid port in {:?}", address)))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.is_empty() {
        return Err(Error::address(format!("missing host in {:?}", address)));
    }

    Ok((host, port))
}
