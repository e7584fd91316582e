use shared::{domain::UserId, error::ApiError};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::warn;

use crate::{
    message::{DisplayMessage, PendingId},
    session::ConnectionState,
};

/// Notifications a chat session pushes to its view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    ConnectionStateChanged(ConnectionState),
    /// The whole visible list was replaced (cached snapshot or fresh history).
    HistoryLoaded(Vec<DisplayMessage>),
    HistoryUnavailable(String),
    MessageAppended(DisplayMessage),
    MessageUpdated(DisplayMessage),
    SendFailed {
        pending_id: PendingId,
        reason: String,
    },
    PeerTyping(bool),
    PresenceChanged {
        user_id: UserId,
        online: bool,
    },
    Reconnected,
    ServerError(ApiError),
}

/// Cancellable handle on a session's notifications. Dropping it or calling
/// [`Subscription::cancel`] detaches it; other subscribers are unaffected.
pub struct Subscription {
    receiver: Option<broadcast::Receiver<ChatEvent>>,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<ChatEvent>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    /// Next event, or `None` once cancelled or the session is gone.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat: subscriber lagged behind session events");
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat: subscriber lagged behind session events");
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Buffered events, oldest first.
    pub fn drain(&mut self) -> Vec<ChatEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn cancel(&mut self) {
        self.receiver = None;
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }
}
