//! Transport seam between the state machine and the socket.
//!
//! The bridge assumes one decoded JSON object per logical message; framing is
//! the transport's problem. Production uses websockets, tests plug in an
//! in-memory pair.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ConnectionError;

/// Write half of an established connection.
#[async_trait]
pub trait TransportSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;
    async fn close(&mut self);
}

/// Read half of an established connection. `None` means the peer is gone.
#[async_trait]
pub trait TransportStream: Send {
    async fn next_text(&mut self) -> Option<Result<String, ConnectionError>>;
}

pub type TransportPair = (Box<dyn TransportSink>, Box<dyn TransportStream>);

/// Connection factory. Each call dials a fresh socket.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<TransportPair, ConnectionError>;
}

/// Production transport over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

type WsStreamInner = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    sink: SplitSink<WsStreamInner, Message>,
}

struct WsStream {
    stream: SplitStream<WsStreamInner>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<TransportPair, ConnectionError> {
        let (ws, _response) = connect_async(url).await.map_err(classify_ws_error)?;
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsStream { stream })))
    }
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(classify_ws_error)
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

#[async_trait]
impl TransportStream for WsStream {
    async fn next_text(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        return Some(Err(ConnectionError::ProtocolError {
                            detail: "binary frame was not utf-8".to_string(),
                        }));
                    }
                },
                Ok(Message::Close(_)) => return None,
                // Control frames carry no protocol payload.
                Ok(_) => {}
                Err(err) => return Some(Err(classify_ws_error(err))),
            }
        }
    }
}

/// Transport-level failures mapped into the closed error set.
fn classify_ws_error(err: WsError) -> ConnectionError {
    match err {
        WsError::Url(detail) => ConnectionError::InvalidServerUrl {
            url: detail.to_string(),
        },
        WsError::Http(response) => match response.status().as_u16() {
            401 | 403 => ConnectionError::AuthenticationFailed,
            429 => ConnectionError::RateLimited {
                retry_after_seconds: None,
            },
            status => ConnectionError::ConnectionFailed {
                detail: format!("http status {status}"),
            },
        },
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            ConnectionError::from_transport("connection closed")
        }
        WsError::Io(io) => ConnectionError::from_transport(io.to_string()),
        other => ConnectionError::from_transport(other.to_string()),
    }
}
