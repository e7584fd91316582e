use std::{collections::BTreeSet, fmt};

use shared::{
    domain::{MessageId, UserId},
    protocol::MessagePayload,
};
use uuid::Uuid;

/// Client-side handle for a message the server has not acknowledged yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingId(Uuid);

impl PendingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PendingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PendingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a displayed message came from: an optimistic local echo or a
/// server-confirmed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageOrigin {
    Local(PendingId),
    Confirmed(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Queued,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryState {
    pub fn can_transition_to(self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        matches!(
            (self, next),
            (Queued, Sent)
                | (Queued, Failed)
                | (Sent, Delivered)
                | (Failed, Queued)
                | (Failed, Sent)
        )
    }
}

/// A chat message. Content is fixed at creation; only the delivery state,
/// the origin (once the server assigns an id) and the per-viewer soft-delete
/// set change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    origin: MessageOrigin,
    from_id: UserId,
    to_id: UserId,
    body: String,
    created_at: String,
    delivery_state: DeliveryState,
    deleted_by_user_ids: BTreeSet<UserId>,
}

impl ChatMessage {
    pub(crate) fn local(
        pending_id: PendingId,
        from_id: UserId,
        to_id: UserId,
        body: String,
        created_at: String,
    ) -> Self {
        Self {
            origin: MessageOrigin::Local(pending_id),
            from_id,
            to_id,
            body,
            created_at,
            delivery_state: DeliveryState::Queued,
            deleted_by_user_ids: BTreeSet::new(),
        }
    }

    /// Builds a message from a server record. Records without an id get a
    /// fresh local handle so they stay addressable in the view.
    pub(crate) fn from_payload(payload: MessagePayload, delivery_state: DeliveryState) -> Self {
        let origin = match payload.id {
            Some(id) => MessageOrigin::Confirmed(id),
            None => MessageOrigin::Local(PendingId::new()),
        };
        Self {
            origin,
            from_id: payload.from_id,
            to_id: payload.to_id,
            body: payload.body,
            created_at: payload.created_at,
            delivery_state,
            deleted_by_user_ids: payload.deleted_by_user_ids,
        }
    }

    pub fn origin(&self) -> MessageOrigin {
        self.origin
    }

    pub fn id(&self) -> Option<MessageId> {
        match self.origin {
            MessageOrigin::Confirmed(id) => Some(id),
            MessageOrigin::Local(_) => None,
        }
    }

    pub fn pending_id(&self) -> Option<PendingId> {
        match self.origin {
            MessageOrigin::Local(pending_id) => Some(pending_id),
            MessageOrigin::Confirmed(_) => None,
        }
    }

    pub fn from_id(&self) -> UserId {
        self.from_id
    }

    pub fn to_id(&self) -> UserId {
        self.to_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn delivery_state(&self) -> DeliveryState {
        self.delivery_state
    }

    pub fn deleted_by_user_ids(&self) -> &BTreeSet<UserId> {
        &self.deleted_by_user_ids
    }

    pub fn matches_submission(&self, payload: &MessagePayload) -> bool {
        payload.same_submission(&self.body, &self.created_at)
    }

    /// Applies a delivery transition; returns false when it would move the
    /// message backwards.
    pub(crate) fn advance(&mut self, next: DeliveryState) -> bool {
        if !self.delivery_state.can_transition_to(next) {
            return false;
        }
        self.delivery_state = next;
        true
    }

    pub(crate) fn confirm(&mut self, id: Option<MessageId>) {
        if let Some(id) = id {
            self.origin = MessageOrigin::Confirmed(id);
        }
    }

    pub(crate) fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id(),
            from_id: self.from_id,
            to_id: self.to_id,
            body: self.body.clone(),
            created_at: self.created_at.clone(),
            deleted_by_user_ids: self.deleted_by_user_ids.clone(),
        }
    }
}

/// A message as the view renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub message: ChatMessage,
    /// True when the viewer authored the message.
    pub is_sent: bool,
    pub formatted_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued() -> ChatMessage {
        ChatMessage::local(
            PendingId::new(),
            UserId(7),
            UserId(42),
            "hello".into(),
            "2024-01-01T00:00:00Z".into(),
        )
    }

    #[test]
    fn delivery_only_moves_forward() {
        let mut message = queued();
        assert!(message.advance(DeliveryState::Sent));
        assert!(message.advance(DeliveryState::Delivered));
        assert!(!message.advance(DeliveryState::Sent));
        assert!(!message.advance(DeliveryState::Queued));
        assert_eq!(message.delivery_state(), DeliveryState::Delivered);
    }

    #[test]
    fn receipt_cannot_skip_acknowledgment() {
        let mut message = queued();
        assert!(!message.advance(DeliveryState::Delivered));
        assert_eq!(message.delivery_state(), DeliveryState::Queued);
    }

    #[test]
    fn late_acknowledgment_of_failed_message_marks_it_sent() {
        let mut message = queued();
        assert!(message.advance(DeliveryState::Failed));
        assert!(message.advance(DeliveryState::Sent));
        assert!(!message.advance(DeliveryState::Failed));
    }

    #[test]
    fn failed_message_can_be_requeued() {
        let mut message = queued();
        assert!(message.advance(DeliveryState::Failed));
        assert!(message.advance(DeliveryState::Queued));
        assert_eq!(message.delivery_state(), DeliveryState::Queued);
    }

    #[test]
    fn confirmation_replaces_local_origin() {
        let mut message = queued();
        assert!(message.pending_id().is_some());
        message.confirm(Some(MessageId(99)));
        assert_eq!(message.origin(), MessageOrigin::Confirmed(MessageId(99)));
        assert_eq!(message.id(), Some(MessageId(99)));
    }
}
