use async_trait::async_trait;
use reqwest::Client;
use shared::{domain::UserId, error::ApiError, protocol::MessagePayload};
use tracing::{debug, warn};

use crate::{credential::Credential, error::HistoryFetchError};

/// Source of prior messages between two participants, oldest first.
#[async_trait]
pub trait MessageHistoryService: Send + Sync {
    async fn fetch(
        &self,
        credential: &Credential,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<MessagePayload>, HistoryFetchError>;
}

/// `GET {server_url}/messages/{a}/{b}` with bearer authentication.
pub struct HttpHistoryService {
    http: Client,
    server_url: String,
}

impl HttpHistoryService {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MessageHistoryService for HttpHistoryService {
    async fn fetch(
        &self,
        credential: &Credential,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<MessagePayload>, HistoryFetchError> {
        let response = self
            .http
            .get(format!("{}/messages/{}/{}", self.server_url, a.0, b.0))
            .bearer_auth(credential.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), a = a.0, b = b.0, "history: fetch rejected");
            return Err(match serde_json::from_str::<ApiError>(&body) {
                Ok(api_error) => HistoryFetchError::Api(api_error),
                Err(_) => HistoryFetchError::Unavailable(format!("server returned {status}")),
            });
        }

        let messages: Vec<MessagePayload> = response.json().await?;
        debug!(count = messages.len(), a = a.0, b = b.0, "history: fetched");
        Ok(messages)
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
