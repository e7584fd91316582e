//! In-process doubles for the transport and history seams.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::UserId,
    protocol::{ClientFrame, MessagePayload, ServerFrame},
};
use tokio::sync::mpsc;

use crate::{
    credential::Credential,
    error::{HistoryFetchError, TransportError},
    history::MessageHistoryService,
    transport::{ChatTransport, ConnectRequest, TransportEvent, TransportLink},
};

/// Server side of one in-memory connection.
pub struct ServerEnd {
    pub request: ConnectRequest,
    pub from_client: mpsc::UnboundedReceiver<ClientFrame>,
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerEnd {
    pub fn push(&self, frame: ServerFrame) {
        self.to_client
            .send(TransportEvent::Frame(frame))
            .expect("session listener alive");
    }

    pub fn fail_send(&self, frame: ClientFrame, reason: &str) {
        self.to_client
            .send(TransportEvent::SendFailed {
                frame,
                reason: reason.into(),
            })
            .expect("session listener alive");
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            reason: Some(reason.into()),
        });
    }

    pub async fn next_frame(&mut self) -> ClientFrame {
        tokio::time::timeout(Duration::from_secs(30), self.from_client.recv())
            .await
            .expect("frame within timeout")
            .expect("client side open")
    }

    /// Frames written so far, without waiting.
    pub fn written(&mut self) -> Vec<ClientFrame> {
        std::iter::from_fn(|| self.from_client.try_recv().ok()).collect()
    }
}

pub struct MemoryTransport {
    connections: mpsc::UnboundedSender<ServerEnd>,
    auto_ack: bool,
    refuse_next: AtomicU32,
    attempts: AtomicU32,
}

impl MemoryTransport {
    /// Transport whose connections are acknowledged immediately.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(true)
    }

    /// Transport that leaves the `connected` frame to the test.
    pub fn without_ack() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(false)
    }

    fn build(auto_ack: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (connections, accepted) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connections,
            auto_ack,
            refuse_next: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        });
        (transport, accepted)
    }

    pub fn refuse_next(&self, count: u32) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn connect(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        if self.auto_ack {
            let _ = to_client.send(TransportEvent::Frame(ServerFrame::Connected));
        }
        let _ = self.connections.send(ServerEnd {
            request: request.clone(),
            from_client,
            to_client,
        });
        Ok(TransportLink { outbound, inbound })
    }
}

/// History service returning a fixed answer.
pub struct StaticHistory {
    result: Mutex<Result<Vec<MessagePayload>, String>>,
    calls: AtomicU32,
}

impl StaticHistory {
    pub fn returning(messages: Vec<MessagePayload>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Ok(messages)),
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Err(reason.into())),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHistoryService for StaticHistory {
    async fn fetch(
        &self,
        _credential: &Credential,
        _a: UserId,
        _b: UserId,
    ) -> Result<Vec<MessagePayload>, HistoryFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .lock()
            .expect("history lock")
            .clone()
            .map_err(HistoryFetchError::Unavailable)
    }
}

pub fn payload(id: Option<i64>, from: i64, to: i64, body: &str, created_at: &str) -> MessagePayload {
    MessagePayload {
        id: id.map(shared::domain::MessageId),
        from_id: UserId(from),
        to_id: UserId(to),
        body: body.into(),
        created_at: created_at.into(),
        deleted_by_user_ids: Default::default(),
    }
}
