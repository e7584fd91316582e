use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{MessageId, UserId},
    error::ApiError,
};

/// A chat message as the server stores and relays it.
///
/// `created_at` stays a raw string: the server does not guarantee a valid
/// timestamp and the client has to render whatever it gets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub from_id: UserId,
    pub to_id: UserId,
    pub body: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deleted_by_user_ids: BTreeSet<UserId>,
}

impl MessagePayload {
    pub fn is_deleted_for(&self, viewer: UserId) -> bool {
        self.deleted_by_user_ids.contains(&viewer)
    }

    /// Correlation used for acknowledgments: no id exists client-side before
    /// the server assigns one, so content and timestamp have to do.
    pub fn same_submission(&self, body: &str, created_at: &str) -> bool {
        self.body == body && self.created_at == created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTyping {
    pub to_id: UserId,
    pub typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundTyping {
    pub from_id: UserId,
    pub typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}

impl PresenceStatus {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    pub id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub id: MessageId,
}

/// Frames the client writes to the chat socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    SendMessage(MessagePayload),
    Typing(OutboundTyping),
}

/// Frames the chat server pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Handshake acknowledgment; always the first frame of a connection.
    Connected,
    ReceiveMessage(MessagePayload),
    MessageSent(MessagePayload),
    MessageDelivered(DeliveryReceipt),
    Typing(InboundTyping),
    UserStatus(UserStatus),
    Error(ApiError),
}
