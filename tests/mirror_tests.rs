//! Integration tests for the reconciliation engine: each test feeds events
//! through `MirrorStore::apply`/`bind` and checks the exposed read surface.

use std::cell::RefCell;
use std::rc::Rc;

use chatglass::events::{
    AssociationOp, ChatPatch, ContactPatch, HistorySyncPayload, LabelAssociationPayload,
    MessageUpsertKind, MessagesUpsertPayload, PresencePayload, SyncEvent,
};
use chatglass::identity::contact_fingerprint;
use chatglass::model::{
    Chat, Contact, Label, LabelAssociation, Message, MessageKey, Presence, PresenceEntry,
};
use chatglass::store::{MirrorStore, ProfilePictureSource};
use serde_json::{json, Map};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn chat(id: &str, timestamp: u64) -> Chat {
    Chat {
        id: id.to_string(),
        name: None,
        pinned: false,
        archived: false,
        conversation_timestamp: Some(timestamp),
        unread_count: 0,
    }
}

fn contact(id: &str, name: Option<&str>) -> Contact {
    Contact {
        id: id.to_string(),
        name: name.map(str::to_string),
        notify: None,
        img_url: None,
    }
}

fn msg(jid: &str, id: &str, text: &str) -> Message {
    Message {
        key: MessageKey {
            remote_jid: jid.to_string(),
            id: id.to_string(),
            from_me: false,
        },
        message_timestamp: None,
        push_name: None,
        content: json!({ "conversation": text }),
    }
}

fn label(id: &str, name: &str) -> Label {
    Label {
        id: id.to_string(),
        name: name.to_string(),
        color: None,
        deleted: false,
    }
}

fn empty_patch(id: &str) -> ChatPatch {
    ChatPatch {
        id: id.to_string(),
        name: None,
        pinned: None,
        archived: None,
        conversation_timestamp: None,
        unread_count: None,
    }
}

fn messages_upsert(messages: Vec<Message>, kind: MessageUpsertKind) -> SyncEvent {
    SyncEvent::MessagesUpsert(MessagesUpsertPayload { messages, kind })
}

fn chat_ids(store: &MirrorStore) -> Vec<String> {
    store.chats().iter().map(|c| c.id.clone()).collect()
}

fn message_ids(store: &MirrorStore, jid: &str) -> Vec<String> {
    store
        .messages(jid)
        .map(|list| list.iter().map(|m| m.key.id.clone()).collect())
        .unwrap_or_default()
}

/// Collaborator stub that records which JIDs were asked for.
struct RecordingPictures {
    url: Option<String>,
    asked: Rc<RefCell<Vec<String>>>,
}

impl ProfilePictureSource for RecordingPictures {
    fn profile_picture_url(&self, jid: &str) -> Option<String> {
        self.asked.borrow_mut().push(jid.to_string());
        self.url.clone()
    }
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

#[test]
fn chats_upsert_is_idempotent() {
    let mut store = MirrorStore::new();
    let batch = vec![chat("a@s.whatsapp.net", 100), chat("b@s.whatsapp.net", 200)];

    store.apply(SyncEvent::ChatsUpsert(batch.clone()));
    let once: Vec<Chat> = store.chats().iter().cloned().collect();

    store.apply(SyncEvent::ChatsUpsert(batch));
    let twice: Vec<Chat> = store.chats().iter().cloned().collect();

    assert_eq!(once, twice);
    assert_eq!(store.chats().len(), 2);
}

#[test]
fn chats_upsert_overwrites_while_update_merges() {
    let mut store = MirrorStore::new();
    let mut named = chat("a@s.whatsapp.net", 100);
    named.name = Some("Alice".to_string());
    named.unread_count = 4;
    store.apply(SyncEvent::ChatsUpsert(vec![named]));

    // A full upsert replaces the whole record — the name is gone.
    store.apply(SyncEvent::ChatsUpsert(vec![chat("a@s.whatsapp.net", 150)]));
    let a = store.chats().get("a@s.whatsapp.net").unwrap();
    assert_eq!(a.name, None);
    assert_eq!(a.unread_count, 0);
}

#[test]
fn unread_count_accumulates_when_positive_and_overwrites_otherwise() {
    let mut store = MirrorStore::new();
    let mut c = chat("a@s.whatsapp.net", 100);
    c.unread_count = 2;
    store.apply(SyncEvent::ChatsUpsert(vec![c]));

    store.apply(SyncEvent::ChatsUpdate(vec![ChatPatch {
        unread_count: Some(3),
        ..empty_patch("a@s.whatsapp.net")
    }]));
    assert_eq!(
        store.chats().get("a@s.whatsapp.net").unwrap().unread_count,
        5
    );

    // The non-positive branch is a literal overwrite, not an increment —
    // the asymmetry is intentional and load-bearing (mark-as-read sends 0).
    store.apply(SyncEvent::ChatsUpdate(vec![ChatPatch {
        unread_count: Some(0),
        ..empty_patch("a@s.whatsapp.net")
    }]));
    assert_eq!(
        store.chats().get("a@s.whatsapp.net").unwrap().unread_count,
        0
    );
}

#[test]
fn chat_updates_reposition_by_the_new_sort_key() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ChatsUpsert(vec![
        chat("a@s.whatsapp.net", 100),
        chat("b@s.whatsapp.net", 200),
    ]));
    assert_eq!(chat_ids(&store), vec!["b@s.whatsapp.net", "a@s.whatsapp.net"]);

    store.apply(SyncEvent::ChatsUpdate(vec![ChatPatch {
        conversation_timestamp: Some(300),
        ..empty_patch("a@s.whatsapp.net")
    }]));
    assert_eq!(chat_ids(&store), vec!["a@s.whatsapp.net", "b@s.whatsapp.net"]);
}

#[test]
fn chat_updates_never_create_chats() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ChatsUpdate(vec![ChatPatch {
        unread_count: Some(1),
        ..empty_patch("ghost@s.whatsapp.net")
    }]));
    assert!(store.chats().is_empty());
}

#[test]
fn chats_delete_removes_present_and_ignores_absent() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ChatsUpsert(vec![chat("a@s.whatsapp.net", 100)]));

    store.apply(SyncEvent::ChatsDelete(vec![
        "a@s.whatsapp.net".to_string(),
        "ghost@s.whatsapp.net".to_string(),
    ]));

    assert!(store.chats().is_empty());
}

// ---------------------------------------------------------------------------
// History snapshots
// ---------------------------------------------------------------------------

#[test]
fn latest_snapshot_resets_chats_and_messages() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ChatsUpsert(vec![
        chat("a@s.whatsapp.net", 100),
        chat("b@s.whatsapp.net", 200),
    ]));
    store.apply(messages_upsert(
        vec![msg("a@s.whatsapp.net", "m1", "hi")],
        MessageUpsertKind::Append,
    ));

    store.apply(SyncEvent::MessagingHistorySet(HistorySyncPayload {
        chats: vec![chat("c@s.whatsapp.net", 300)],
        contacts: vec![],
        messages: vec![],
        is_latest: true,
    }));

    assert_eq!(chat_ids(&store), vec!["c@s.whatsapp.net"]);
    assert!(store.messages("a@s.whatsapp.net").is_none());
}

#[test]
fn snapshot_chats_never_overwrite_live_state() {
    let mut store = MirrorStore::new();
    let mut live = chat("a@s.whatsapp.net", 500);
    live.unread_count = 7;
    store.apply(SyncEvent::ChatsUpsert(vec![live]));

    store.apply(SyncEvent::MessagingHistorySet(HistorySyncPayload {
        chats: vec![chat("a@s.whatsapp.net", 100), chat("b@s.whatsapp.net", 200)],
        contacts: vec![],
        messages: vec![],
        is_latest: false,
    }));

    let a = store.chats().get("a@s.whatsapp.net").unwrap();
    assert_eq!(a.unread_count, 7);
    assert_eq!(a.conversation_timestamp, Some(500));
    assert!(store.chats().get("b@s.whatsapp.net").is_some());
}

#[test]
fn snapshot_messages_prepend_before_live_ones() {
    let mut store = MirrorStore::new();
    store.apply(messages_upsert(
        vec![msg("a@s.whatsapp.net", "live", "now")],
        MessageUpsertKind::Notify,
    ));

    store.apply(SyncEvent::MessagingHistorySet(HistorySyncPayload {
        chats: vec![],
        contacts: vec![],
        messages: vec![msg("a@s.whatsapp.net", "old", "then")],
        is_latest: false,
    }));

    assert_eq!(message_ids(&store, "a@s.whatsapp.net"), vec!["old", "live"]);
}

#[test]
fn latest_snapshot_diffs_contacts_by_id() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ContactsUpsert(vec![
        contact("keep@s.whatsapp.net", Some("Keep")),
        contact("drop@s.whatsapp.net", Some("Drop")),
    ]));

    store.apply(SyncEvent::MessagingHistorySet(HistorySyncPayload {
        chats: vec![],
        contacts: vec![contact("keep@s.whatsapp.net", None)],
        messages: vec![],
        is_latest: true,
    }));

    // The absent contact is deleted; the present one merges, keeping its
    // previously known name.
    assert!(store.contact("drop@s.whatsapp.net").is_none());
    let kept = store.contact("keep@s.whatsapp.net").unwrap();
    assert_eq!(kept.name.as_deref(), Some("Keep"));
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

#[test]
fn contacts_upsert_merges_fieldwise() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ContactsUpsert(vec![contact(
        "a@s.whatsapp.net",
        Some("Alice"),
    )]));

    let mut with_notify = contact("a@s.whatsapp.net", None);
    with_notify.notify = Some("allie".to_string());
    store.apply(SyncEvent::ContactsUpsert(vec![with_notify]));

    let merged = store.contact("a@s.whatsapp.net").unwrap();
    assert_eq!(merged.name.as_deref(), Some("Alice"));
    assert_eq!(merged.notify.as_deref(), Some("allie"));
}

#[test]
fn contact_update_resolves_fingerprint_keys() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ContactsUpsert(vec![contact(
        "1234567890@s.whatsapp.net",
        None,
    )]));

    let fingerprint = contact_fingerprint("1234567890@s.whatsapp.net");
    store.apply(SyncEvent::ContactsUpdate(vec![ContactPatch {
        id: fingerprint,
        name: Some("Resolved".to_string()),
        notify: None,
        img_url: None,
    }]));

    let resolved = store.contact("1234567890@s.whatsapp.net").unwrap();
    assert_eq!(resolved.name.as_deref(), Some("Resolved"));
    assert_eq!(store.contacts().len(), 1);
}

#[test]
fn contact_update_with_no_match_is_dropped() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ContactsUpdate(vec![ContactPatch {
        id: "zzz".to_string(),
        name: Some("Nobody".to_string()),
        notify: None,
        img_url: None,
    }]));
    assert!(store.contacts().is_empty());
}

#[test]
fn img_url_changed_asks_the_session() {
    let mut store = MirrorStore::new();
    store.apply(SyncEvent::ContactsUpsert(vec![contact(
        "a@s.whatsapp.net",
        None,
    )]));

    let asked = Rc::new(RefCell::new(Vec::new()));
    store.set_picture_source(Box::new(RecordingPictures {
        url: Some("https://cdn.example/alice.jpg".to_string()),
        asked: asked.clone(),
    }));

    store.apply(SyncEvent::ContactsUpdate(vec![ContactPatch {
        id: "a@s.whatsapp.net".to_string(),
        name: None,
        notify: None,
        img_url: Some("changed".to_string()),
    }]));

    assert_eq!(asked.borrow().as_slice(), ["a@s.whatsapp.net"]);
    assert_eq!(
        store.contact("a@s.whatsapp.net").unwrap().img_url.as_deref(),
        Some("https://cdn.example/alice.jpg")
    );
}

#[test]
fn img_url_changed_without_a_session_leaves_the_field_unset() {
    let mut store = MirrorStore::new();
    let mut with_picture = contact("a@s.whatsapp.net", None);
    with_picture.img_url = Some("https://cdn.example/stale.jpg".to_string());
    store.apply(SyncEvent::ContactsUpsert(vec![with_picture]));

    store.apply(SyncEvent::ContactsUpdate(vec![ContactPatch {
        id: "a@s.whatsapp.net".to_string(),
        name: None,
        notify: None,
        img_url: Some("changed".to_string()),
    }]));

    assert_eq!(store.contact("a@s.whatsapp.net").unwrap().img_url, None);
}

#[test]
fn img_url_removed_clears_the_field() {
    let mut store = MirrorStore::new();
    let mut with_picture = contact("a@s.whatsapp.net", None);
    with_picture.img_url = Some("https://cdn.example/alice.jpg".to_string());
    store.apply(SyncEvent::ContactsUpsert(vec![with_picture]));

    store.apply(SyncEvent::ContactsUpdate(vec![ContactPatch {
        id: "a@s.whatsapp.net".to_string(),
        name: None,
        notify: None,
        img_url: Some("removed".to_string()),
    }]));

    assert_eq!(store.contact("a@s.whatsapp.net").unwrap().img_url, None);
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[test]
fn repeated_message_ids_keep_their_position() {
    let mut store = MirrorStore::new();
    store.apply(messages_upsert(
        vec![
            msg("a@s.whatsapp.net", "m1", "one"),
            msg("a@s.whatsapp.net", "m2", "two"),
        ],
        MessageUpsertKind::Notify,
    ));

    store.apply(messages_upsert(
        vec![msg("a@s.whatsapp.net", "m1", "one, edited")],
        MessageUpsertKind::Append,
    ));

    assert_eq!(message_ids(&store, "a@s.whatsapp.net"), vec!["m1", "m2"]);
    assert_eq!(
        store.message("a@s.whatsapp.net", "m1").unwrap().content,
        json!({ "conversation": "one, edited" })
    );
    assert_eq!(
        store.most_recent_message("a@s.whatsapp.net").unwrap().key.id,
        "m2"
    );
}

#[test]
fn notify_synthesizes_a_placeholder_chat() {
    let mut store = MirrorStore::new();
    let mut named = msg("new@s.whatsapp.net", "m1", "hello");
    named.push_name = Some("Newcomer".to_string());

    store.apply(messages_upsert(vec![named], MessageUpsertKind::Notify));

    let synthesized = store.chats().get("new@s.whatsapp.net").unwrap();
    assert_eq!(synthesized.name.as_deref(), Some("Newcomer"));
    assert_eq!(message_ids(&store, "new@s.whatsapp.net"), vec!["m1"]);
}

#[test]
fn append_does_not_create_chats() {
    let mut store = MirrorStore::new();
    store.apply(messages_upsert(
        vec![msg("new@s.whatsapp.net", "m1", "hello")],
        MessageUpsertKind::Append,
    ));

    assert!(store.chats().get("new@s.whatsapp.net").is_none());
    // The message itself is still stored.
    assert_eq!(message_ids(&store, "new@s.whatsapp.net"), vec!["m1"]);
}

#[test]
fn unknown_upsert_kind_stores_nothing() {
    let mut store = MirrorStore::new();
    store.apply(messages_upsert(
        vec![msg("a@s.whatsapp.net", "m1", "hello")],
        MessageUpsertKind::Unknown("history".to_string()),
    ));

    assert!(store.messages("a@s.whatsapp.net").is_none());
}

// ---------------------------------------------------------------------------
// Labels and associations
// ---------------------------------------------------------------------------

#[test]
fn twenty_first_label_is_rejected_not_truncated() {
    let mut store = MirrorStore::new();
    for n in 0..21 {
        store.apply(SyncEvent::LabelsEdit(label(&n.to_string(), &format!("label {n}"))));
    }

    assert_eq!(store.labels().len(), 20);
    assert!(store.labels().get("20").is_none());
    for n in 0..20 {
        assert!(store.labels().get(&n.to_string()).is_some());
    }
}

#[test]
fn deleted_labels_free_capacity() {
    let mut store = MirrorStore::new();
    for n in 0..20 {
        store.apply(SyncEvent::LabelsEdit(label(&n.to_string(), &format!("label {n}"))));
    }

    let mut tombstone = label("0", "label 0");
    tombstone.deleted = true;
    store.apply(SyncEvent::LabelsEdit(tombstone));
    assert_eq!(store.labels().len(), 19);

    store.apply(SyncEvent::LabelsEdit(label("fresh", "fresh")));
    assert!(store.labels().get("fresh").is_some());
}

#[test]
fn label_associations_add_remove_and_reject_unknown_ops() {
    let mut store = MirrorStore::new();
    let chat_assoc = LabelAssociation::Chat {
        chat_id: "a@s.whatsapp.net".to_string(),
        label_id: "1".to_string(),
    };
    let message_assoc = LabelAssociation::Message {
        chat_id: "a@s.whatsapp.net".to_string(),
        message_id: "m1".to_string(),
        label_id: "1".to_string(),
    };

    store.apply(SyncEvent::LabelsAssociation(LabelAssociationPayload {
        op: AssociationOp::Add,
        association: chat_assoc.clone(),
    }));
    store.apply(SyncEvent::LabelsAssociation(LabelAssociationPayload {
        op: AssociationOp::Add,
        association: message_assoc.clone(),
    }));
    // Re-adding the same row is a replace, not a duplicate.
    store.apply(SyncEvent::LabelsAssociation(LabelAssociationPayload {
        op: AssociationOp::Add,
        association: chat_assoc.clone(),
    }));
    assert_eq!(store.label_associations().len(), 2);

    store.apply(SyncEvent::LabelsAssociation(LabelAssociationPayload {
        op: AssociationOp::Remove,
        association: chat_assoc,
    }));
    assert_eq!(store.label_associations().len(), 1);

    store.apply(SyncEvent::LabelsAssociation(LabelAssociationPayload {
        op: AssociationOp::Unknown("toggle".to_string()),
        association: message_assoc,
    }));
    assert_eq!(store.label_associations().len(), 1);
}

// ---------------------------------------------------------------------------
// Presence and connection state
// ---------------------------------------------------------------------------

#[test]
fn presence_updates_accumulate_participants() {
    let mut store = MirrorStore::new();

    let mut first = std::collections::HashMap::new();
    first.insert(
        "p1@s.whatsapp.net".to_string(),
        PresenceEntry {
            last_known_presence: Presence::Available,
            last_seen: Some(1_700_000_000),
        },
    );
    store.apply(SyncEvent::PresenceUpdate(PresencePayload {
        id: "group@g.us".to_string(),
        presences: first,
    }));

    let mut second = std::collections::HashMap::new();
    second.insert(
        "p2@s.whatsapp.net".to_string(),
        PresenceEntry {
            last_known_presence: Presence::Composing,
            last_seen: None,
        },
    );
    // p1 goes quiet without a fresh last_seen.
    second.insert(
        "p1@s.whatsapp.net".to_string(),
        PresenceEntry {
            last_known_presence: Presence::Unavailable,
            last_seen: None,
        },
    );
    store.apply(SyncEvent::PresenceUpdate(PresencePayload {
        id: "group@g.us".to_string(),
        presences: second,
    }));

    let chat = store.presences().get("group@g.us").unwrap();
    assert_eq!(chat.len(), 2);
    let p1 = &chat["p1@s.whatsapp.net"];
    assert_eq!(p1.last_known_presence, Presence::Unavailable);
    // The previously known last_seen survives an update without one.
    assert_eq!(p1.last_seen, Some(1_700_000_000));
}

#[test]
fn connection_updates_merge_and_empty_ones_are_dropped() {
    let mut store = MirrorStore::new();

    let mut first = Map::new();
    first.insert("connection".to_string(), json!("connecting"));
    first.insert("received_pending_notifications".to_string(), json!(false));
    store.apply(SyncEvent::ConnectionUpdate(first));

    store.apply(SyncEvent::ConnectionUpdate(Map::new()));

    let mut second = Map::new();
    second.insert("connection".to_string(), json!("open"));
    store.apply(SyncEvent::ConnectionUpdate(second));

    let state = store.connection_state();
    assert_eq!(state.get("connection"), Some(&json!("open")));
    assert_eq!(
        state.get("received_pending_notifications"),
        Some(&json!(false))
    );
}

// ---------------------------------------------------------------------------
// Wire format and binding
// ---------------------------------------------------------------------------

#[test]
fn events_deserialize_under_their_wire_names() {
    let event: SyncEvent = serde_json::from_value(json!({
        "chats.update": [{ "id": "a@s.whatsapp.net", "unread_count": 3 }]
    }))
    .unwrap();
    assert!(matches!(event, SyncEvent::ChatsUpdate(ref patches) if patches.len() == 1));

    let event: SyncEvent = serde_json::from_value(json!({
        "messages.upsert": {
            "messages": [{ "key": { "remote_jid": "a@s.whatsapp.net", "id": "m1" } }],
            "type": "notify"
        }
    }))
    .unwrap();
    let SyncEvent::MessagesUpsert(payload) = event else {
        panic!("expected messages.upsert");
    };
    assert_eq!(payload.kind, MessageUpsertKind::Notify);

    // An unrecognized sub-tag decodes instead of failing the stream.
    let event: SyncEvent = serde_json::from_value(json!({
        "messages.upsert": { "messages": [], "type": "replace" }
    }))
    .unwrap();
    let SyncEvent::MessagesUpsert(payload) = event else {
        panic!("expected messages.upsert");
    };
    assert_eq!(
        payload.kind,
        MessageUpsertKind::Unknown("replace".to_string())
    );
}

#[test]
fn bind_applies_events_in_arrival_order() {
    let mut store = MirrorStore::new();
    store.bind(vec![
        SyncEvent::ChatsUpsert(vec![chat("a@s.whatsapp.net", 100)]),
        SyncEvent::ChatsUpdate(vec![ChatPatch {
            unread_count: Some(2),
            ..empty_patch("a@s.whatsapp.net")
        }]),
        SyncEvent::ChatsUpdate(vec![ChatPatch {
            unread_count: Some(0),
            ..empty_patch("a@s.whatsapp.net")
        }]),
    ]);

    // Applied strictly in order: +2 then overwrite with 0.
    assert_eq!(
        store.chats().get("a@s.whatsapp.net").unwrap().unread_count,
        0
    );
}
