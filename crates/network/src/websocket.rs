//! WebSocket transport
//!
//! Each call opens a websocket to `<server url>/<Service>/<Method>`, sends one
//! binary frame and waits for one binary frame back. A server reports an
//! application error by closing the socket with a reason.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::frame::coding::CloseCode, Message},
    MaybeTlsStream, WebSocketStream,
};

use crate::identity::ServerIdentity;
use crate::transport::{Dialer, Transport, TransportError};

/// Dials servers over websockets
#[derive(Debug, Clone, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(
        &self,
        server: &ServerIdentity,
        path: &str,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let base = server
            .websocket_url()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let url = format!("{}/{}", base, path);

        let (stream, _) = connect_async(&url).await.map_err(map_ws_error)?;
        tracing::trace!("Opened websocket to {}", url);

        Ok(Box::new(WebSocketTransport { stream, url }))
    }
}

/// An open websocket to one server endpoint
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
}

impl WebSocketTransport {
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(frame))
            .await
            .map_err(map_ws_error)
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Binary(data)) => return Ok(data),
                Ok(Message::Close(frame)) => {
                    let reason = match frame {
                        Some(f) if f.code != CloseCode::Normal => {
                            format!("{} ({})", f.reason, u16::from(f.code))
                        }
                        _ => "closed by peer".to_string(),
                    };
                    return Err(TransportError::Closed(reason));
                }
                Ok(Message::Text(text)) => {
                    tracing::debug!("Ignoring text frame from {}: {}", self.url, text);
                }
                Ok(_) => {}
                Err(e) => return Err(map_ws_error(e)),
            }
        }
        Err(TransportError::Eof)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!("Closing websocket to {}: {}", self.url, e);
        }
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed("connection closed".to_string())
        }
        tungstenite::Error::Io(io) => match io.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportError::Refused(io.to_string()),
            std::io::ErrorKind::TimedOut => TransportError::Timeout,
            std::io::ErrorKind::UnexpectedEof => TransportError::Eof,
            _ => TransportError::Other(io.to_string()),
        },
        other => TransportError::Other(other.to_string()),
    }
}
