//! Synchronization events emitted by the remote session.
//!
//! - [`SyncEvent`] is the closed union of every event kind the mirror
//!   consumes; dispatch over it is an exhaustive match, so adding a kind is
//!   a compile-time visible change.
//! - Events serialize externally tagged under their wire names
//!   (`"chats.update"`, `"messaging-history.set"`, ...).
//! - Sub-tags that arrive as free-form strings (`messages.upsert` type, the
//!   association op) decode into enums with an `Unknown` catch-all, so an
//!   unrecognized tag is a diagnostic on one event rather than a
//!   deserialization failure on the stream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Chat, Contact, Label, LabelAssociation, Message, PresenceEntry};

/// One synchronization event, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Partial key/value bag describing session connectivity.
    #[serde(rename = "connection.update")]
    ConnectionUpdate(Map<String, Value>),
    /// A (possibly full) history snapshot of chats, contacts, and messages.
    #[serde(rename = "messaging-history.set")]
    MessagingHistorySet(HistorySyncPayload),
    #[serde(rename = "contacts.upsert")]
    ContactsUpsert(Vec<Contact>),
    #[serde(rename = "contacts.update")]
    ContactsUpdate(Vec<ContactPatch>),
    #[serde(rename = "chats.upsert")]
    ChatsUpsert(Vec<Chat>),
    #[serde(rename = "chats.update")]
    ChatsUpdate(Vec<ChatPatch>),
    #[serde(rename = "labels.edit")]
    LabelsEdit(Label),
    #[serde(rename = "labels.association")]
    LabelsAssociation(LabelAssociationPayload),
    #[serde(rename = "presence.update")]
    PresenceUpdate(PresencePayload),
    #[serde(rename = "chats.delete")]
    ChatsDelete(Vec<String>),
    #[serde(rename = "messages.upsert")]
    MessagesUpsert(MessagesUpsertPayload),
}

/// Payload of `messaging-history.set`.
///
/// When `is_latest` is set the snapshot is authoritative: chats and message
/// lists are reset before merging, and contacts the batch no longer carries
/// are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HistorySyncPayload {
    #[serde(default)]
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub is_latest: bool,
}

/// Partial update to a chat.  Absent fields leave the mirrored chat alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_timestamp: Option<u64>,
    /// Positive values accumulate onto the mirrored count; zero and negative
    /// values overwrite it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<i64>,
}

/// Partial update to a contact.  May arrive keyed by a fingerprint rather
/// than the canonical id; see [`crate::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ContactPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
    /// `"changed"` and `"removed"` are sentinels (fetch via the session /
    /// clear the field); any other value leaves the field untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
}

/// Operation tag on a `labels.association` event.
///
/// Arrives as a free-form string; anything but the two known ops is kept
/// verbatim so the diagnostic can name it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssociationOp {
    Add,
    Remove,
    Unknown(String),
}

impl From<String> for AssociationOp {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "add" => AssociationOp::Add,
            "remove" => AssociationOp::Remove,
            _ => AssociationOp::Unknown(tag),
        }
    }
}

impl From<AssociationOp> for String {
    fn from(op: AssociationOp) -> Self {
        match op {
            AssociationOp::Add => "add".to_string(),
            AssociationOp::Remove => "remove".to_string(),
            AssociationOp::Unknown(tag) => tag,
        }
    }
}

/// Payload of `labels.association`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LabelAssociationPayload {
    pub op: AssociationOp,
    pub association: LabelAssociation,
}

/// Payload of `presence.update`: one chat, one or more participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PresencePayload {
    pub id: String,
    pub presences: HashMap<String, PresenceEntry>,
}

/// Position tag on a `messages.upsert` event.  Arrives as a free-form
/// string; unrecognized tags are kept verbatim for the diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageUpsertKind {
    /// Messages already accounted for by the session (history fill-in).
    Append,
    /// Freshly received messages; may reference chats the mirror has never
    /// seen, which are then synthesized.
    Notify,
    Unknown(String),
}

impl From<String> for MessageUpsertKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "append" => MessageUpsertKind::Append,
            "notify" => MessageUpsertKind::Notify,
            _ => MessageUpsertKind::Unknown(tag),
        }
    }
}

impl From<MessageUpsertKind> for String {
    fn from(kind: MessageUpsertKind) -> Self {
        match kind {
            MessageUpsertKind::Append => "append".to_string(),
            MessageUpsertKind::Notify => "notify".to_string(),
            MessageUpsertKind::Unknown(tag) => tag,
        }
    }
}

/// Payload of `messages.upsert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessagesUpsertPayload {
    pub messages: Vec<Message>,
    #[serde(rename = "type")]
    pub kind: MessageUpsertKind,
}
