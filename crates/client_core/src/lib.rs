//! Client side of a one-to-one chat: history loading, a real-time socket
//! session with an outbound queue, delivery receipts, typing and presence.

pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod history;
pub mod message;
pub mod outbound;
pub mod presence;
pub mod reconcile;
pub mod session;
pub mod transport;
pub mod typing;

#[cfg(test)]
mod test_support;

pub use config::{ReconnectPolicy, SessionConfig};
pub use credential::Credential;
pub use error::{ConnectError, HistoryFetchError, TransportError};
pub use events::{ChatEvent, Subscription};
pub use history::{HttpHistoryService, MessageHistoryService};
pub use message::{ChatMessage, DeliveryState, DisplayMessage, MessageOrigin, PendingId};
pub use session::{ChatSession, ConnectionState, SessionContext, SessionDependencies};
pub use transport::{ChatTransport, WebSocketTransport};
pub use typing::TypingState;
