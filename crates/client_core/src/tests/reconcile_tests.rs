use super::*;
use std::collections::BTreeSet;

use shared::domain::MessageId;

const VIEWER: UserId = UserId(7);
const PEER: UserId = UserId(42);

fn record(id: i64, from: UserId, to: UserId, body: &str, created_at: &str) -> MessagePayload {
    MessagePayload {
        id: Some(MessageId(id)),
        from_id: from,
        to_id: to,
        body: body.to_string(),
        created_at: created_at.to_string(),
        deleted_by_user_ids: BTreeSet::new(),
    }
}

fn conversation() -> ConversationKey {
    ConversationKey::new(VIEWER, PEER)
}

fn reconcile_history(
    fetched: Vec<MessagePayload>,
    viewer: UserId,
    conversation: ConversationKey,
    time_format: &str,
) -> Vec<DisplayMessage> {
    annotate(&visible_history(fetched, viewer, conversation), viewer, time_format)
}

#[test]
fn incoming_history_entry_is_annotated_for_viewer() {
    let fetched = vec![record(1, PEER, VIEWER, "hi", "2024-01-01T00:00:00Z")];

    let view = reconcile_history(fetched, VIEWER, conversation(), "%Y-%m-%d %H:%M");

    assert_eq!(view.len(), 1);
    assert!(!view[0].is_sent);
    assert_eq!(view[0].formatted_time, "2024-01-01 00:00");
    assert_eq!(view[0].message.body(), "hi");
    assert_eq!(view[0].message.id(), Some(MessageId(1)));
    assert_eq!(view[0].message.delivery_state(), DeliveryState::Delivered);
}

#[test]
fn own_history_entry_is_marked_sent() {
    let fetched = vec![record(2, VIEWER, PEER, "yo", "2024-01-01T00:01:00Z")];

    let view = reconcile_history(fetched, VIEWER, conversation(), "%H:%M");

    assert!(view[0].is_sent);
    assert_eq!(view[0].message.delivery_state(), DeliveryState::Sent);
}

#[test]
fn soft_delete_hides_message_only_for_deleting_viewer() {
    let mut deleted = record(3, PEER, VIEWER, "oops", "2024-01-01T00:02:00Z");
    deleted.deleted_by_user_ids.insert(VIEWER);
    let fetched = vec![
        record(1, PEER, VIEWER, "hi", "2024-01-01T00:00:00Z"),
        deleted,
    ];

    let viewer_view = reconcile_history(fetched.clone(), VIEWER, conversation(), "%H:%M");
    let peer_view = reconcile_history(fetched, PEER, conversation(), "%H:%M");

    assert_eq!(viewer_view.len(), 1);
    assert!(viewer_view.iter().all(|m| m.message.body() != "oops"));
    assert_eq!(peer_view.len(), 2);
    assert!(peer_view.iter().any(|m| m.message.body() == "oops"));
    assert!(peer_view[1].is_sent);
}

#[test]
fn fetched_order_is_kept_without_resorting() {
    let fetched = vec![
        record(2, PEER, VIEWER, "second", "2024-01-01T00:05:00Z"),
        record(1, VIEWER, PEER, "first", "2024-01-01T00:00:00Z"),
    ];

    let view = reconcile_history(fetched, VIEWER, conversation(), "%H:%M");

    let bodies: Vec<_> = view.iter().map(|m| m.message.body()).collect();
    assert_eq!(bodies, ["second", "first"]);
}

#[test]
fn records_from_other_conversations_are_dropped() {
    let fetched = vec![
        record(1, PEER, VIEWER, "hi", "2024-01-01T00:00:00Z"),
        record(2, UserId(99), VIEWER, "elsewhere", "2024-01-01T00:00:00Z"),
    ];

    let view = reconcile_history(fetched, VIEWER, conversation(), "%H:%M");

    assert_eq!(view.len(), 1);
}

#[test]
fn invalid_timestamp_renders_marker() {
    assert_eq!(format_timestamp("yesterday-ish", "%H:%M"), INVALID_DATE);
    assert_eq!(format_timestamp("", "%H:%M"), INVALID_DATE);
    assert_eq!(
        format_timestamp("2024-03-05T10:30:00+02:00", "%H:%M"),
        "08:30"
    );
}

#[test]
fn cached_snapshot_is_scoped_to_its_conversation() {
    let snapshot = CachedHistory {
        conversation: conversation(),
        messages: vec![record(1, PEER, VIEWER, "hi", "2024-01-01T00:00:00Z")],
    };
    let raw = serde_json::to_string(&snapshot).expect("json");

    assert_eq!(
        CachedHistory::decode_for(&raw, conversation()).map(|m| m.len()),
        Some(1)
    );
    assert_eq!(
        CachedHistory::decode_for(&raw, ConversationKey::new(VIEWER, UserId(5))),
        None
    );
    assert_eq!(CachedHistory::decode_for("not json", conversation()), None);
    assert_eq!(cache_key(VIEWER), "chat-history:7");
}
