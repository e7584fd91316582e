//! Per-conversation real-time session: one socket, one outbound queue, one
//! typing signal, one view.
//!
//! Every socket, timer and reconnect task carries the connection generation
//! it was started under and is dropped on arrival if the session has moved
//! on (closed or reconnected) since.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use shared::{
    domain::{ConversationKey, MessageId, UserId},
    protocol::{
        ClientFrame, InboundTyping, MessagePayload, OutboundTyping, ServerFrame,
    },
};
use storage::LocalCache;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::SessionConfig,
    credential::Credential,
    error::{ConnectError, TransportError},
    events::{ChatEvent, Subscription},
    history::MessageHistoryService,
    message::{ChatMessage, DeliveryState, DisplayMessage, MessageOrigin, PendingId},
    outbound::PendingQueue,
    presence::PresenceRoster,
    reconcile::{annotate, cache_key, display, visible_history, CachedHistory},
    transport::{ChatTransport, ConnectRequest, TransportEvent, TransportLink},
    typing::{TypingSignal, TypingState},
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Identity and settings a session is created with, scoped to one
/// conversation view.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub viewer: UserId,
    pub config: SessionConfig,
}

#[derive(Clone)]
pub struct SessionDependencies {
    pub transport: Arc<dyn ChatTransport>,
    pub history: Arc<dyn MessageHistoryService>,
    pub cache: Arc<dyn LocalCache>,
}

pub struct ChatSession {
    context: SessionContext,
    peer: UserId,
    conversation: ConversationKey,
    deps: SessionDependencies,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<ChatEvent>,
}

struct SessionState {
    connection_state: ConnectionState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    pending: PendingQueue,
    view: Vec<DisplayMessage>,
    typing: TypingSignal,
    peer_typing: bool,
    peer_typing_token: u64,
    presence: PresenceRoster,
    listener: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    typing_timer: Option<JoinHandle<()>>,
    peer_typing_timer: Option<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            generation: 0,
            outbound: None,
            pending: PendingQueue::new(),
            view: Vec::new(),
            typing: TypingSignal::new(),
            peer_typing: false,
            peer_typing_token: 0,
            presence: PresenceRoster::new(),
            listener: None,
            reconnect_task: None,
            typing_timer: None,
            peer_typing_timer: None,
        }
    }

    fn has_live_resources(&self) -> bool {
        self.connection_state != ConnectionState::Disconnected
            || self.outbound.is_some()
            || self.listener.is_some()
            || self.reconnect_task.is_some()
            || self.typing_timer.is_some()
            || self.peer_typing_timer.is_some()
    }
}

impl ChatSession {
    pub fn new(context: SessionContext, peer: UserId, deps: SessionDependencies) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let conversation = ConversationKey::new(context.viewer, peer);
        Arc::new(Self {
            context,
            peer,
            conversation,
            deps,
            inner: Mutex::new(SessionState::new()),
            events,
        })
    }

    pub fn viewer(&self) -> UserId {
        self.context.viewer
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    pub fn conversation_key(&self) -> ConversationKey {
        self.conversation
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection_state
    }

    pub async fn messages(&self) -> Vec<DisplayMessage> {
        self.inner.lock().await.view.clone()
    }

    pub async fn pending_outbound(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.pending.messages().cloned().collect()
    }

    pub async fn peer_is_typing(&self) -> bool {
        self.inner.lock().await.peer_typing
    }

    pub async fn typing_state(&self) -> TypingState {
        self.inner.lock().await.typing.state()
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.inner.lock().await.presence.online()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.lock().await.presence.is_online(user_id)
    }

    /// Loads history, then connects. Opening a session that is already
    /// connecting, connected or reconnecting is a no-op.
    pub async fn open(self: &Arc<Self>, credential: Option<Credential>) -> Result<(), ConnectError> {
        let credential = credential.ok_or(ConnectError::NoCredential)?;

        let generation = {
            let mut state = self.inner.lock().await;
            if state.connection_state != ConnectionState::Disconnected {
                debug!(
                    conversation = %self.conversation,
                    state = ?state.connection_state,
                    "chat: open ignored, session already active"
                );
                return Ok(());
            }
            state.generation += 1;
            state.presence.clear();
            self.set_connection_state(&mut state, ConnectionState::Connecting);
            state.generation
        };
        info!(
            viewer = self.viewer().0,
            peer = self.peer.0,
            generation,
            "chat: opening session"
        );

        self.load_history(&credential, generation).await;

        if !self.is_current(generation).await {
            return Err(ConnectError::Cancelled);
        }

        match self.connect_link(&credential).await {
            Ok((link, early)) => {
                self.install_link(generation, credential, link, early)
                    .await
            }
            Err(err) => {
                warn!(
                    conversation = %self.conversation,
                    error = %err,
                    "chat: connect failed"
                );
                let mut state = self.inner.lock().await;
                if state.generation == generation {
                    self.set_connection_state(&mut state, ConnectionState::Disconnected);
                }
                Err(ConnectError::TransportFailure(err))
            }
        }
    }

    /// Queues `body`, echoes it to the view immediately and writes it to the
    /// channel when connected. Blank bodies are ignored.
    pub async fn send(&self, body: &str) -> Option<PendingId> {
        if body.trim().is_empty() {
            return None;
        }

        let pending_id = PendingId::new();
        let message = ChatMessage::local(
            pending_id,
            self.viewer(),
            self.peer,
            body.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        let mut state = self.inner.lock().await;
        let shown = self.display(message.clone());
        state.pending.push(message);
        state.view.push(shown.clone());
        let _ = self.events.send(ChatEvent::MessageAppended(shown));

        if state.connection_state == ConnectionState::Connected {
            let generation = state.generation;
            self.transmit_pending(&mut state, pending_id, generation);
        } else {
            debug!(%pending_id, "chat: not connected, message stays queued");
        }
        Some(pending_id)
    }

    /// Manual resend of a failed message. Returns false when `pending_id` is
    /// unknown or not in the failed state.
    pub async fn retry(&self, pending_id: PendingId) -> bool {
        let mut state = self.inner.lock().await;
        let Some(message) = state.pending.requeue(pending_id).cloned() else {
            return false;
        };
        self.update_view(&mut state, message);
        info!(%pending_id, "chat: message requeued for retry");

        if state.connection_state == ConnectionState::Connected {
            let generation = state.generation;
            self.transmit_pending(&mut state, pending_id, generation);
        }
        true
    }

    /// Local keystroke: raises the typing signal on the first one and
    /// (re)arms the debounce timer.
    pub async fn keystroke(self: &Arc<Self>) {
        let mut state = self.inner.lock().await;
        let stroke = state.typing.keystroke();
        if stroke.raise {
            self.transmit_typing(&mut state, true);
        }

        if let Some(timer) = state.typing_timer.take() {
            timer.abort();
        }
        let deadline = Instant::now() + self.context.config.typing_debounce;
        let session = Arc::clone(self);
        state.typing_timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            session.typing_expired(stroke.timer).await;
        }));
    }

    /// Tears the session down: timers and listeners are cancelled, the
    /// channel is closed. Further calls do nothing.
    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        if !state.has_live_resources() {
            debug!(conversation = %self.conversation, "chat: close ignored, already closed");
            return;
        }

        if state.typing.reset() {
            self.transmit_typing(&mut state, false);
        }
        state.generation += 1;
        for task in [
            state.listener.take(),
            state.reconnect_task.take(),
            state.typing_timer.take(),
            state.peer_typing_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        state.outbound = None;
        state.peer_typing = false;
        self.set_connection_state(&mut state, ConnectionState::Disconnected);
        info!(conversation = %self.conversation, "chat: session closed");
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().await.generation == generation
    }

    async fn load_history(&self, credential: &Credential, generation: u64) {
        let key = cache_key(self.viewer());
        match self.deps.cache.read(&key).await {
            Ok(Some(raw)) => match CachedHistory::decode_for(&raw, self.conversation) {
                Some(cached) => {
                    debug!(count = cached.len(), "cache: showing cached history");
                    self.replace_history(generation, &cached).await;
                }
                None => debug!("cache: snapshot belongs to another conversation"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "cache: failed to read history snapshot"),
        }

        let fetched = match self
            .deps
            .history
            .fetch(credential, self.viewer(), self.peer)
            .await
        {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(
                    conversation = %self.conversation,
                    error = %err,
                    "history: fetch failed, keeping cached view"
                );
                if self.is_current(generation).await {
                    let _ = self
                        .events
                        .send(ChatEvent::HistoryUnavailable(err.to_string()));
                }
                return;
            }
        };

        let visible = visible_history(fetched, self.viewer(), self.conversation);
        if !self.replace_history(generation, &visible).await {
            return;
        }

        let snapshot = CachedHistory {
            conversation: self.conversation,
            messages: visible,
        };
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(err) = self.deps.cache.write(&key, &raw).await {
                    warn!(error = %err, "cache: failed to write history snapshot");
                }
            }
            Err(err) => warn!(error = %err, "cache: failed to encode history snapshot"),
        }
    }

    /// Replaces the view with `history` followed by the still-pending local
    /// echoes. Returns false when the session moved on meanwhile.
    async fn replace_history(&self, generation: u64, history: &[MessagePayload]) -> bool {
        let mut state = self.inner.lock().await;
        if state.generation != generation {
            return false;
        }
        let viewer = self.viewer();
        let time_format = &self.context.config.time_format;
        let mut view = annotate(history, viewer, time_format);
        view.extend(
            state
                .pending
                .messages()
                .cloned()
                .map(|message| display(message, viewer, time_format)),
        );
        state.view = view.clone();
        let _ = self.events.send(ChatEvent::HistoryLoaded(view));
        true
    }

    async fn connect_link(
        &self,
        credential: &Credential,
    ) -> Result<(TransportLink, Vec<ServerFrame>), TransportError> {
        let request = ConnectRequest::build(&self.context.config, credential, self.peer)?;
        let timeout = self.context.config.handshake_timeout;
        match tokio::time::timeout(timeout, self.handshake(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::HandshakeTimeout(timeout)),
        }
    }

    /// Connects and waits for the `connected` acknowledgment. Frames that
    /// arrive earlier are returned for replay.
    async fn handshake(
        &self,
        request: &ConnectRequest,
    ) -> Result<(TransportLink, Vec<ServerFrame>), TransportError> {
        let mut link = self.deps.transport.connect(request).await?;
        let mut early = Vec::new();
        loop {
            match link.inbound.recv().await {
                Some(TransportEvent::Frame(ServerFrame::Connected)) => return Ok((link, early)),
                Some(TransportEvent::Frame(frame)) => early.push(frame),
                Some(TransportEvent::SendFailed { .. }) => {}
                Some(TransportEvent::Closed { .. }) | None => {
                    return Err(TransportError::ClosedBeforeHandshake)
                }
            }
        }
    }

    async fn install_link(
        self: &Arc<Self>,
        generation: u64,
        credential: Credential,
        link: TransportLink,
        early: Vec<ServerFrame>,
    ) -> Result<(), ConnectError> {
        let TransportLink { outbound, inbound } = link;
        let mut state = self.inner.lock().await;
        if state.generation != generation {
            debug!(generation, "chat: discarding connection for superseded session");
            return Err(ConnectError::Cancelled);
        }

        state.outbound = Some(outbound);
        state.reconnect_task = None;
        self.set_connection_state(&mut state, ConnectionState::Connected);
        self.flush_pending(&mut state, generation);
        // A burst typed while offline never reached the peer.
        if state.typing.state() == TypingState::TypingSignaled {
            self.transmit_typing(&mut state, true);
        }
        for frame in early {
            self.apply_frame(&mut state, frame);
        }

        let session = Arc::clone(self);
        state.listener = Some(tokio::spawn(async move {
            session.listen(generation, credential, inbound).await;
        }));
        info!(
            conversation = %self.conversation,
            generation,
            "chat: connected"
        );
        Ok(())
    }

    async fn listen(
        self: Arc<Self>,
        generation: u64,
        credential: Credential,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut reason = None;
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Frame(frame) => {
                    let mut state = self.inner.lock().await;
                    if state.generation != generation {
                        return;
                    }
                    self.apply_frame(&mut state, frame);
                }
                TransportEvent::SendFailed { frame, reason } => {
                    let mut state = self.inner.lock().await;
                    if state.generation != generation {
                        return;
                    }
                    self.apply_send_failure(&mut state, frame, reason);
                }
                TransportEvent::Closed { reason: closed } => {
                    reason = closed;
                    break;
                }
            }
        }
        self.handle_disconnect(generation, credential, reason).await;
    }

    async fn handle_disconnect(
        self: &Arc<Self>,
        generation: u64,
        credential: Credential,
        reason: Option<String>,
    ) {
        let mut state = self.inner.lock().await;
        if state.generation != generation || state.connection_state != ConnectionState::Connected
        {
            return;
        }

        warn!(
            conversation = %self.conversation,
            generation,
            reason = reason.as_deref().unwrap_or("none"),
            "chat: channel closed unexpectedly"
        );
        state.generation += 1;
        let next = state.generation;
        state.outbound = None;
        // This runs on the listener task itself; let it finish on its own.
        state.listener = None;
        self.set_connection_state(&mut state, ConnectionState::Reconnecting);

        let session = Arc::clone(self);
        state.reconnect_task = Some(tokio::spawn(async move {
            session.reconnect(next, credential).await;
        }));
    }

    /// Boxed: the reconnect loop re-enters `install_link`, which spawns the
    /// listener that may spawn this loop again.
    fn reconnect(self: Arc<Self>, generation: u64, credential: Credential) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let policy = self.context.config.reconnect.clone();
            for attempt in 1..=policy.max_attempts {
                let delay = policy.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if !self.is_current(generation).await {
                    return;
                }

                match self.connect_link(&credential).await {
                    Ok((link, early)) => {
                        if self
                            .install_link(generation, credential, link, early)
                            .await
                            .is_ok()
                        {
                            info!(attempt, "chat: reconnected");
                            let _ = self.events.send(ChatEvent::Reconnected);
                        }
                        return;
                    }
                    Err(err) => warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "chat: reconnect attempt failed"
                    ),
                }
            }

            let mut state = self.inner.lock().await;
            if state.generation == generation {
                warn!(
                    conversation = %self.conversation,
                    attempts = policy.max_attempts,
                    "chat: giving up on reconnect"
                );
                state.reconnect_task = None;
                self.set_connection_state(&mut state, ConnectionState::Disconnected);
            }
        })
    }

    async fn typing_expired(&self, timer: u64) {
        let mut state = self.inner.lock().await;
        if state.typing.expire(timer) {
            state.typing_timer = None;
            self.transmit_typing(&mut state, false);
        }
    }

    async fn peer_typing_expired(&self, token: u64) {
        let mut state = self.inner.lock().await;
        if state.peer_typing_token != token {
            return;
        }
        state.peer_typing_timer = None;
        if state.peer_typing {
            debug!(peer = self.peer.0, "chat: peer typing indicator timed out");
            state.peer_typing = false;
            let _ = self.events.send(ChatEvent::PeerTyping(false));
        }
    }

    fn apply_frame(self: &Arc<Self>, state: &mut SessionState, frame: ServerFrame) {
        match frame {
            ServerFrame::Connected => debug!("chat: ignoring repeated handshake acknowledgment"),
            ServerFrame::ReceiveMessage(payload) => self.apply_inbound(state, payload),
            ServerFrame::MessageSent(payload) => self.apply_ack(state, payload),
            ServerFrame::MessageDelivered(receipt) => self.apply_receipt(state, receipt.id),
            ServerFrame::Typing(typing) => self.apply_peer_typing(state, typing),
            ServerFrame::UserStatus(status) => {
                if state.presence.apply(status) {
                    let _ = self.events.send(ChatEvent::PresenceChanged {
                        user_id: status.id,
                        online: status.status.is_online(),
                    });
                }
            }
            ServerFrame::Error(api_error) => {
                warn!(error = %api_error, "chat: server reported an error");
                let _ = self.events.send(ChatEvent::ServerError(api_error));
            }
        }
    }

    fn apply_inbound(&self, state: &mut SessionState, payload: MessagePayload) {
        if !self.conversation.covers(payload.from_id, payload.to_id) {
            debug!(
                from = payload.from_id.0,
                to = payload.to_id.0,
                "chat: ignoring message for another conversation"
            );
            return;
        }
        // The server may echo our own sends back; treat those as acknowledgments.
        if payload.from_id == self.viewer()
            && state
                .pending
                .messages()
                .any(|pending| pending.matches_submission(&payload))
        {
            self.apply_ack(state, payload);
            return;
        }
        if payload.is_deleted_for(self.viewer()) {
            return;
        }
        if let Some(id) = payload.id {
            let origin = MessageOrigin::Confirmed(id);
            if state.view.iter().any(|entry| entry.message.origin() == origin) {
                debug!(id = id.0, "chat: message already shown");
                return;
            }
        }

        let shown = self.display(ChatMessage::from_payload(payload, DeliveryState::Delivered));
        state.view.push(shown.clone());
        let _ = self.events.send(ChatEvent::MessageAppended(shown));
    }

    fn apply_ack(&self, state: &mut SessionState, payload: MessagePayload) {
        let Some(mut message) = state.pending.take_matching(&payload) else {
            debug!(id = ?payload.id, "chat: acknowledgment matches no pending message");
            return;
        };
        let Some(pending_id) = message.pending_id() else {
            return;
        };
        message.advance(DeliveryState::Sent);
        message.confirm(payload.id);
        debug!(%pending_id, id = ?payload.id, "chat: message acknowledged");
        self.replace_in_view(state, MessageOrigin::Local(pending_id), message);
    }

    fn apply_receipt(&self, state: &mut SessionState, id: MessageId) {
        let origin = MessageOrigin::Confirmed(id);
        let Some(entry) = state
            .view
            .iter_mut()
            .find(|entry| entry.message.origin() == origin)
        else {
            debug!(id = id.0, "chat: receipt for unknown message");
            return;
        };
        if entry.message.advance(DeliveryState::Delivered) {
            let _ = self.events.send(ChatEvent::MessageUpdated(entry.clone()));
        }
    }

    fn apply_peer_typing(self: &Arc<Self>, state: &mut SessionState, typing: InboundTyping) {
        if typing.from_id != self.peer {
            return;
        }
        if state.peer_typing != typing.typing {
            state.peer_typing = typing.typing;
            let _ = self.events.send(ChatEvent::PeerTyping(typing.typing));
        }

        state.peer_typing_token = state.peer_typing_token.wrapping_add(1);
        if let Some(timer) = state.peer_typing_timer.take() {
            timer.abort();
        }
        if let (true, Some(timeout)) = (typing.typing, self.context.config.peer_typing_timeout) {
            let token = state.peer_typing_token;
            let deadline = Instant::now() + timeout;
            let session = Arc::clone(self);
            state.peer_typing_timer = Some(tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                session.peer_typing_expired(token).await;
            }));
        }
    }

    fn apply_send_failure(&self, state: &mut SessionState, frame: ClientFrame, reason: String) {
        let ClientFrame::SendMessage(payload) = frame else {
            debug!(%reason, "chat: typing signal could not be written");
            return;
        };
        let Some(message) = state.pending.fail_matching(&payload).cloned() else {
            return;
        };
        let Some(pending_id) = message.pending_id() else {
            return;
        };
        warn!(%pending_id, %reason, "chat: message could not be sent");
        self.update_view(state, message);
        let _ = self.events.send(ChatEvent::SendFailed { pending_id, reason });
    }

    /// Writes every queued message not yet written on this connection, in
    /// submission order. Runs under the state lock, so sends issued meanwhile
    /// land after the flush.
    fn flush_pending(&self, state: &mut SessionState, generation: u64) {
        let due = state.pending.due_for(generation);
        if due.is_empty() {
            return;
        }
        info!(count = due.len(), generation, "chat: flushing queued messages");
        for pending_id in due {
            self.transmit_pending(state, pending_id, generation);
        }
    }

    fn transmit_pending(&self, state: &mut SessionState, pending_id: PendingId, generation: u64) {
        let Some(message) = state.pending.get(pending_id) else {
            return;
        };
        let frame = ClientFrame::SendMessage(message.to_payload());
        let Some(outbound) = state.outbound.as_ref() else {
            return;
        };
        if outbound.send(frame).is_ok() {
            state.pending.mark_transmitted(pending_id, generation);
        } else {
            debug!(%pending_id, "chat: channel writer gone, message stays queued");
        }
    }

    fn transmit_typing(&self, state: &mut SessionState, typing: bool) {
        if state.connection_state != ConnectionState::Connected {
            return;
        }
        if let Some(outbound) = state.outbound.as_ref() {
            let _ = outbound.send(ClientFrame::Typing(OutboundTyping {
                to_id: self.peer,
                typing,
            }));
        }
    }

    /// Refreshes the view entry for a pending message after a state change.
    fn update_view(&self, state: &mut SessionState, message: ChatMessage) {
        if let Some(pending_id) = message.pending_id() {
            self.replace_in_view(state, MessageOrigin::Local(pending_id), message);
        }
    }

    fn replace_in_view(&self, state: &mut SessionState, origin: MessageOrigin, message: ChatMessage) {
        let shown = self.display(message);
        match state
            .view
            .iter_mut()
            .find(|entry| entry.message.origin() == origin)
        {
            Some(entry) => *entry = shown.clone(),
            None => state.view.push(shown.clone()),
        }
        let _ = self.events.send(ChatEvent::MessageUpdated(shown));
    }

    fn display(&self, message: ChatMessage) -> DisplayMessage {
        display(message, self.viewer(), &self.context.config.time_format)
    }

    fn set_connection_state(&self, state: &mut SessionState, next: ConnectionState) {
        if state.connection_state == next {
            return;
        }
        debug!(from = ?state.connection_state, to = ?next, "chat: connection state changed");
        state.connection_state = next;
        let _ = self.events.send(ChatEvent::ConnectionStateChanged(next));
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
