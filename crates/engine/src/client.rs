//! WebSocket client for the engine's event channel.
//!
//! [`EventChannelClient`] holds the endpoint configuration. Call
//! [`EventChannelClient::connect`] to open a live [`WsStream`]. The server
//! assigns the client identifier itself and announces it in its first
//! (`connected`) message.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The raw WebSocket stream for reading/writing frames.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the event channel endpoint.
#[derive(Debug, Clone)]
pub struct EventChannelClient {
    ws_url: String,
}

impl EventChannelClient {
    /// * `ws_url` - full WebSocket URL, e.g. `ws://host:3000/ws`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the WebSocket.
    pub async fn connect(&self) -> Result<WsStream, EventChannelError> {
        let (ws_stream, _response) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            EventChannelError::Connection(format!(
                "Failed to connect to event channel at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(url = %self.ws_url, "Event channel socket open");
        Ok(ws_stream)
    }
}

/// Derive the event channel URL from the HTTP API base.
///
/// `http` becomes `ws`, `https` becomes `wss`, and the path is replaced
/// by `/ws` on the same origin.
pub fn ws_url_from_api_base(api_base: &str) -> String {
    let (scheme, rest) = if let Some(rest) = api_base.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = api_base.strip_prefix("http://") {
        ("ws", rest)
    } else {
        ("ws", api_base)
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    format!("{scheme}://{authority}/ws")
}

/// Errors that can occur when working with the event channel.
#[derive(Debug, thiserror::Error)]
pub enum EventChannelError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
