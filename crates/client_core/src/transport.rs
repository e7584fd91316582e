use std::fmt;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::UserId,
    protocol::{ClientFrame, ServerFrame},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{config::SessionConfig, credential::Credential, error::TransportError};

/// Where and as whom to open the chat socket.
#[derive(Clone)]
pub struct ConnectRequest {
    pub url: Url,
    pub peer: UserId,
}

impl ConnectRequest {
    pub fn build(
        config: &SessionConfig,
        credential: &Credential,
        peer: UserId,
    ) -> Result<Self, TransportError> {
        let mut url = socket_url(&config.server_url, &config.socket_path)?;
        url.query_pairs_mut()
            .append_pair("token", credential.expose())
            .append_pair("peer", &peer.to_string());
        Ok(Self { url, peer })
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.url.host_str())
            .field("path", &self.url.path())
            .field("peer", &self.peer)
            .finish()
    }
}

/// Derives the socket URL from the API base URL (`http` → `ws`, `https` → `wss`).
pub fn socket_url(server_url: &str, socket_path: &str) -> Result<Url, TransportError> {
    let server_url = server_url.trim_end_matches('/');
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(TransportError::InvalidEndpoint(
            "server_url must start with http:// or https://".into(),
        ));
    };
    let socket_path = socket_path.trim_start_matches('/');
    Url::parse(&format!("{ws_url}/{socket_path}"))
        .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(ServerFrame),
    /// A frame handed to the link could not be written.
    SendFailed {
        frame: ClientFrame,
        reason: String,
    },
    Closed {
        reason: Option<String>,
    },
}

/// One live connection. Dropping `outbound` closes the connection; dropping
/// `inbound` stops event delivery.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<ClientFrame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError>;
}

/// JSON text frames over a WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl ChatTransport for WebSocketTransport {
    async fn connect(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError> {
        let (ws_stream, _) = connect_async(request.url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        info!(
            host = request.url.host_str().unwrap_or_default(),
            path = request.url.path(),
            peer = request.peer.0,
            "transport: websocket connected"
        );
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let writer_events = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        let _ = writer_events.send(TransportEvent::SendFailed {
                            frame,
                            reason: TransportError::Codec(err.to_string()).to_string(),
                        });
                        continue;
                    }
                };
                if let Err(err) = ws_writer.send(Message::Text(text)).await {
                    let reason = TransportError::Send(err.to_string()).to_string();
                    warn!(error = %err, "transport: websocket write failed");
                    let _ = writer_events.send(TransportEvent::SendFailed {
                        frame,
                        reason: reason.clone(),
                    });
                    while let Ok(frame) = outbound_rx.try_recv() {
                        let _ = writer_events.send(TransportEvent::SendFailed {
                            frame,
                            reason: reason.clone(),
                        });
                    }
                    return;
                }
            }
            let _ = ws_writer.close().await;
            debug!("transport: websocket writer finished");
        });

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = inbound_tx.closed() => break None,
                    message = ws_reader.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerFrame>(&text) {
                                Ok(frame) => {
                                    if inbound_tx.send(TransportEvent::Frame(frame)).is_err() {
                                        break None;
                                    }
                                }
                                Err(err) => {
                                    warn!(error = %err, "transport: ignoring undecodable server frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map(|frame| frame.reason.to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break Some(err.to_string()),
                        None => break None,
                    },
                }
            };
            debug!(?reason, "transport: websocket reader finished");
            let _ = inbound_tx.send(TransportEvent::Closed { reason });
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
