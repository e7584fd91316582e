//! Builds the conversation view out of fetched history and the local cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ConversationKey, UserId},
    protocol::MessagePayload,
};

use crate::message::{ChatMessage, DeliveryState, DisplayMessage};

pub const INVALID_DATE: &str = "Invalid Date";

/// Renders a raw `createdAt` in UTC. Unparsable input yields [`INVALID_DATE`].
pub fn format_timestamp(raw: &str, format: &str) -> String {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(parsed) => parsed.with_timezone(&Utc).format(format).to_string(),
        Err(_) => INVALID_DATE.to_string(),
    }
}

pub fn display(message: ChatMessage, viewer: UserId, time_format: &str) -> DisplayMessage {
    let formatted_time = format_timestamp(message.created_at(), time_format);
    DisplayMessage {
        is_sent: message.from_id() == viewer,
        formatted_time,
        message,
    }
}

/// Delivery state assumed for a record the server already stored.
pub fn stored_delivery_state(payload: &MessagePayload, viewer: UserId) -> DeliveryState {
    if payload.from_id == viewer {
        DeliveryState::Sent
    } else {
        DeliveryState::Delivered
    }
}

/// Drops records the viewer soft-deleted or that belong to another
/// conversation. Order is preserved as received.
pub fn visible_history(
    fetched: Vec<MessagePayload>,
    viewer: UserId,
    conversation: ConversationKey,
) -> Vec<MessagePayload> {
    fetched
        .into_iter()
        .filter(|payload| !payload.is_deleted_for(viewer))
        .filter(|payload| conversation.covers(payload.from_id, payload.to_id))
        .collect()
}

pub fn annotate(history: &[MessagePayload], viewer: UserId, time_format: &str) -> Vec<DisplayMessage> {
    history
        .iter()
        .cloned()
        .map(|payload| {
            let state = stored_delivery_state(&payload, viewer);
            display(ChatMessage::from_payload(payload, state), viewer, time_format)
        })
        .collect()
}

pub fn cache_key(viewer: UserId) -> String {
    format!("chat-history:{}", viewer.0)
}

/// Last-write-wins snapshot stored under [`cache_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHistory {
    pub conversation: ConversationKey,
    pub messages: Vec<MessagePayload>,
}

impl CachedHistory {
    /// Parses a stored snapshot, keeping it only if it belongs to `conversation`.
    pub fn decode_for(raw: &str, conversation: ConversationKey) -> Option<Vec<MessagePayload>> {
        let cached: CachedHistory = serde_json::from_str(raw).ok()?;
        (cached.conversation == conversation).then_some(cached.messages)
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
