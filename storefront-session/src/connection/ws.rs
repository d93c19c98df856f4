use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::stomp::Frame;
use super::transport::{link, Link, LinkHandle, Transport};
use crate::error::ConnectionError;
use crate::identity::BearerToken;

/// Raw websocket path of the broker's SockJS endpoint
pub const DEFAULT_REALTIME_URL: &str = "ws://localhost:8080/ws/websocket";

/// STOMP-over-WebSocket transport for the realtime broker.
///
/// The link counts as established once the broker answers the CONNECT frame
/// with CONNECTED. Incoming messages are only traced; subscribing to topics is
/// left to callers of the connection.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, token: &BearerToken) -> Result<Link, ConnectionError> {
        let mut req = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        let host = req.uri().host().unwrap_or("localhost").to_string();

        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| ConnectionError::Transport("token is not a valid header value".into()))?;
        req.headers_mut().insert(AUTHORIZATION, bearer);

        let (mut stream, resp) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| match e {
                WsError::Http(resp) => ConnectionError::Rejected(format!("HTTP {}", resp.status())),
                e => ConnectionError::Transport(e.to_string()),
            })?;
        tracing::debug!(url = %self.url, status = %resp.status(), "Realtime socket upgraded");

        let connect = Frame::connect(&host, token.expose());
        stream
            .send(Message::Text(connect.encode()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        await_connected(&mut stream).await?;
        tracing::debug!(url = %self.url, "Realtime session acknowledged");

        let (link, handle) = link();
        tokio::spawn(pump(stream, handle));
        Ok(link)
    }
}

type Stream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn await_connected(stream: &mut Stream) -> Result<(), ConnectionError> {
    while let Some(message) = stream.next().await {
        match message.map_err(|e| ConnectionError::Transport(e.to_string()))? {
            Message::Text(text) => match Frame::parse(&text)? {
                Some(frame) if frame.is("CONNECTED") => return Ok(()),
                Some(frame) if frame.is("ERROR") => {
                    return Err(ConnectionError::Rejected(frame.error_message()))
                }
                Some(frame) => {
                    tracing::debug!(command = %frame.command, "Ignoring frame before CONNECTED");
                }
                None => {}
            },
            Message::Close(_) => {
                return Err(ConnectionError::Transport(
                    "socket closed before CONNECTED".to_string(),
                ))
            }
            _ => {}
        }
    }
    Err(ConnectionError::Transport(
        "stream ended before CONNECTED".to_string(),
    ))
}

async fn pump(mut stream: Stream, handle: LinkHandle) {
    loop {
        tokio::select! {
            _ = handle.shutdown_requested() => {
                let disconnect = Message::Text(Frame::disconnect().encode());
                if let Err(e) = stream.send(disconnect).await {
                    tracing::debug!(error = %e, "Ignoring error while sending DISCONNECT");
                }
                if let Err(e) = stream.close(None).await {
                    tracing::debug!(error = %e, "Ignoring error while closing realtime link");
                }
                return;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by server ({}): {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                    handle.report_dropped(reason);
                    return;
                }
                Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                    Ok(Some(frame)) if frame.is("ERROR") => {
                        handle.report_dropped(frame.error_message());
                        return;
                    }
                    Ok(Some(frame)) => {
                        tracing::trace!(
                            command = %frame.command,
                            destination = frame.get("destination").unwrap_or_default(),
                            "Realtime frame"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "Unreadable realtime frame"),
                },
                Some(Ok(other)) => {
                    tracing::trace!(len = other.len(), "Realtime frame");
                }
                Some(Err(e)) => {
                    handle.report_dropped(e.to_string());
                    return;
                }
                None => {
                    handle.report_dropped("stream ended");
                    return;
                }
            }
        }
    }
}
