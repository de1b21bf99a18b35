//! SOCKS5 CONNECT client.
//!
//! Only what a dialer needs: method negotiation (no-auth or
//! username/password), one CONNECT request, and the bound-address reply.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::dialer::{split_host_port, BoxedStream, DirectDialer, Dialer};
use crate::error::{Error, Result};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_UNACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Username/password credentials (RFC 1929).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Auth {
    pub username: String,
    pub password: String,
}

/// Dials destinations through a SOCKS5 proxy.
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy_addr: String,
    auth: Option<Socks5Auth>,
    connect: DirectDialer,
    handshake_timeout: Duration,
}

impl Socks5Dialer {
    /// Create a dialer for the proxy at `proxy_addr`.
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            auth: None,
            connect: DirectDialer::new(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Authenticate with username/password.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(Socks5Auth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Proxy address this dialer connects to.
    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    async fn handshake(&self, stream: &mut TcpStream, address: &str) -> Result<()> {
        // === Method negotiation ===
        let method = if self.auth.is_some() {
            METHOD_USER_PASS
        } else {
            METHOD_NO_AUTH
        };
        stream.write_all(&[SOCKS_VERSION, 0x01, method]).await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply[0] != SOCKS_VERSION {
            return Err(Error::socks5(format!("bad version 0x{:02x}", reply[0])));
        }

        match (reply[1], &self.auth) {
            (METHOD_NO_AUTH, None) => {}
            (METHOD_USER_PASS, Some(auth)) => authenticate(stream, auth).await?,
            (METHOD_UNACCEPTABLE, _) => {
                return Err(Error::socks5("no acceptable authentication method"));
            }
            (other, _) => {
                return Err(Error::socks5(format!("unexpected method 0x{:02x}", other)));
            }
        }

        // === CONNECT request ===
        let request = encode_connect(address)?;
        stream.write_all(&request).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[0] != SOCKS_VERSION {
            return Err(Error::socks5(format!("bad version 0x{:02x}", head[0])));
        }
        if head[1] != 0x00 {
            return Err(Error::socks5(format!(
                "connect {} rejected: {}",
                address,
                reply_message(head[1])
            )));
        }

        // Consume BND.ADDR and BND.PORT
        let remaining = match head[3] {
            ATYP_IPV4 => 4 + 2,
            ATYP_IPV6 => 16 + 2,
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                len[0] as usize + 2
            }
            other => return Err(Error::socks5(format!("bad address type 0x{:02x}", other))),
        };
        let mut bound = vec![0u8; remaining];
        stream.read_exact(&mut bound).await?;

        Ok(())
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream> {
        if !matches!(network, "tcp" | "tcp4" | "tcp6") {
            return Err(Error::Unsupported(network.to_string()));
        }

        let mut stream = self.connect.connect("tcp", &self.proxy_addr).await?;

        timeout(self.handshake_timeout, self.handshake(&mut stream, address))
            .await
            .map_err(|_| Error::Timeout(self.handshake_timeout.as_millis() as u64))??;

        tracing::debug!("socks5 {} connected to {}", self.proxy_addr, address);
        Ok(Box::new(stream))
    }
}

async fn authenticate(stream: &mut TcpStream, auth: &Socks5Auth) -> Result<()> {
    let user = auth.username.as_bytes();
    let pass = auth.password.as_bytes();
    if user.len() > 255 || pass.len() > 255 {
        return Err(Error::socks5("username or password too long"));
    }

    let mut msg = Vec::with_capacity(3 + user.len() + pass.len());
    msg.push(0x01);
    msg.push(user.len() as u8);
    msg.extend_from_slice(user);
    msg.push(pass.len() as u8);
    msg.extend_from_slice(pass);
    stream.write_all(&msg).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0x00 {
        return Err(Error::socks5("authentication failed"));
    }
    Ok(())
}

/// Encode a CONNECT request for `host:port`.
fn encode_connect(address: &str) -> Result<Vec<u8>> {
    let (host, port) = split_host_port(address)?;

    let mut msg = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            msg.push(ATYP_IPV4);
            msg.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            msg.push(ATYP_IPV6);
            msg.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(Error::address(format!("domain too long: {}", host)));
            }
            msg.push(ATYP_DOMAIN);
            msg.push(host.len() as u8);
            msg.extend_from_slice(host.as_bytes());
        }
    }
    msg.extend_from_slice(&port.to_be_bytes());
    Ok(msg)
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}
