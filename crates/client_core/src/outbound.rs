//! Submission-ordered queue of messages awaiting server acknowledgment.

use shared::protocol::MessagePayload;

use crate::message::{ChatMessage, DeliveryState, PendingId};

#[derive(Debug, Clone)]
struct PendingEntry {
    message: ChatMessage,
    /// Connection generation the entry was last written on.
    transmitted_on: Option<u64>,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<PendingEntry>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub fn get(&self, pending_id: PendingId) -> Option<&ChatMessage> {
        self.position(pending_id).map(|idx| &self.entries[idx].message)
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(PendingEntry {
            message,
            transmitted_on: None,
        });
    }

    /// Removes and returns the first entry, in submission order, that
    /// `payload` acknowledges. Other entries keep their relative order.
    pub fn take_matching(&mut self, payload: &MessagePayload) -> Option<ChatMessage> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.message.matches_submission(payload))?;
        Some(self.entries.remove(idx).message)
    }

    /// Queued entries not yet written on `generation`, in submission order.
    /// Failed entries wait for a manual retry.
    pub fn due_for(&self, generation: u64) -> Vec<PendingId> {
        self.entries
            .iter()
            .filter(|entry| entry.message.delivery_state() == DeliveryState::Queued)
            .filter(|entry| entry.transmitted_on != Some(generation))
            .filter_map(|entry| entry.message.pending_id())
            .collect()
    }

    pub fn mark_transmitted(&mut self, pending_id: PendingId, generation: u64) {
        if let Some(idx) = self.position(pending_id) {
            self.entries[idx].transmitted_on = Some(generation);
        }
    }

    /// Marks the entry `payload` was built from as failed. Returns the updated
    /// message when something changed.
    pub fn fail_matching(&mut self, payload: &MessagePayload) -> Option<&ChatMessage> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.message.matches_submission(payload))?;
        if !entry.message.advance(DeliveryState::Failed) {
            return None;
        }
        entry.transmitted_on = None;
        Some(&entry.message)
    }

    /// Puts a failed entry back in the queue for retransmission.
    pub fn requeue(&mut self, pending_id: PendingId) -> Option<&ChatMessage> {
        let idx = self.position(pending_id)?;
        let entry = &mut self.entries[idx];
        if !entry.message.advance(DeliveryState::Queued) {
            return None;
        }
        entry.transmitted_on = None;
        Some(&entry.message)
    }

    fn position(&self, pending_id: PendingId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.message.pending_id() == Some(pending_id))
    }
}
