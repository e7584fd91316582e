use std::time::Duration;

use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no credential available for chat session")]
    NoCredential,
    #[error("chat transport failure: {0}")]
    TransportFailure(#[from] TransportError),
    #[error("chat session closed while connecting")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid chat endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to connect chat socket: {0}")]
    Connect(String),
    #[error("chat handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("chat socket closed before handshake acknowledgment")]
    ClosedBeforeHandshake,
    #[error("failed to write to chat socket: {0}")]
    Send(String),
    #[error("failed to encode chat frame: {0}")]
    Codec(String),
}

#[derive(Debug, Error)]
pub enum HistoryFetchError {
    #[error("history request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("history rejected by server: {0}")]
    Api(ApiError),
    #[error("history unavailable: {0}")]
    Unavailable(String),
}
