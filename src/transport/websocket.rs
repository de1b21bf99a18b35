//! WebSocket binary messages as the physical transport.
//!
//! Each multiplexer frame travels as exactly one binary message. The server
//! only upgrades requests for its secret path (`ws://host:port/<secret>`);
//! anything else gets a 404 before the handshake completes. Both ends enable
//! TCP keepalive on the underlying socket.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::transport::{MessageSink, MessageSource, MAX_RECORD_SIZE};

/// Keepalive idle time on the socket under a WebSocket transport.
pub const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Whether `addr` names a WebSocket endpoint rather than a plain `host:port`.
pub fn is_websocket_url(addr: &str) -> bool {
    addr.starts_with("ws://")
}

/// Split an upgraded WebSocket into message halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (WsReader { inner: stream }, WsWriter { inner: sink })
}

/// Parse a `ws://host:port/path` URL into a handshake request and the
/// `host:port` to connect to.
pub fn parse_url(url: &str) -> Result<(Request, String)> {
    if !is_websocket_url(url) {
        return Err(Error::address(format!("not a ws:// url: {:?}", url)));
    }

    let request = url
        .into_client_request()
        .map_err(|e| Error::address(format!("{:?}: {}", url, e)))?;
    let host = request
        .uri()
        .host()
        .ok_or_else(|| Error::address(format!("missing host in {:?}", url)))?
        .to_string();
    let port = request.uri().port_u16().unwrap_or(80);

    let authority = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    Ok((request, authority))
}

/// Dial a multiplexer server at `url` and complete the client handshake.
pub async fn connect(
    url: &str,
    connect_timeout: Duration,
) -> Result<(WsReader<TcpStream>, WsWriter<TcpStream>)> {
    let (request, authority) = parse_url(url)?;

    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&authority))
        .await
        .map_err(|_| Error::Timeout(connect_timeout.as_millis() as u64))??;
    set_keepalive(&stream);

    let (ws, response) = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::client_async(request, stream),
    )
    .await
    .map_err(|_| Error::Timeout(connect_timeout.as_millis() as u64))?
    .map_err(|e| Error::websocket(format!("handshake with {} failed: {}", authority, e)))?;

    tracing::debug!("websocket handshake with {}: {}", authority, response.status());
    Ok(split(ws))
}

/// Complete the server handshake on an accepted socket.
///
/// Requests for any path other than `path` are answered with 404.
pub async fn accept(
    stream: TcpStream,
    path: &str,
) -> Result<(WsReader<TcpStream>, WsWriter<TcpStream>)> {
    set_keepalive(&stream);

    let expected = normalize_path(path);
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == expected {
            Ok(response)
        } else {
            tracing::debug!("rejecting websocket upgrade for {}", request.uri().path());
            let mut refusal = ErrorResponse::new(None);
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, check_path)
        .await
        .map_err(|e| Error::websocket(format!("upgrade failed: {}", e)))?;
    Ok(split(ws))
}

/// `secret` and `/secret` both mean the path `/secret`.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn set_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!("failed to enable keepalive: {}", e);
    }
}

/// Receiving half: yields the payload of each binary message.
pub struct WsReader<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> MessageSource for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            let msg = match self.inner.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(Error::websocket(e.to_string())),
            };

            match msg {
                Message::Binary(data) => {
                    if data.len() > MAX_RECORD_SIZE {
                        return Err(Error::frame(format!(
                            "message too large: {} bytes",
                            data.len()
                        )));
                    }
                    return Ok(Some(data));
                }
                Message::Close(frame) => {
                    tracing::debug!("websocket closed by peer: {:?}", frame);
                    return Ok(None);
                }
                // Pings are answered by tungstenite on the next write.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Text(_) | Message::Frame(_) => {
                    tracing::debug!("ignoring non-binary websocket message");
                }
            }
        }
    }
}

/// Sending half: one binary message per call.
pub struct WsWriter<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> MessageSink for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, msg: Bytes) -> Result<()> {
        if msg.len() > MAX_RECORD_SIZE {
            return Err(Error::frame(format!("message too large: {} bytes", msg.len())));
        }
        self.inner
            .send(Message::Binary(msg))
            .await
            .map_err(|e| Error::websocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(Error::websocket(e.to_string())),
        }
    }
}
