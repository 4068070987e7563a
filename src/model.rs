//! Entity types mirrored from the remote session.
//!
//! Everything here is plain data: the merge and ordering policy that keeps
//! these types consistent lives in [`crate::store`] and [`crate::collections`].
//! All types serialize with snake_case field names so a snapshot of the
//! mirror round-trips through JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collections::{Keyed, SortKeyed};

/// A conversation as the remote session reports it.
///
/// The composite sort key (see [`SortKeyed`] impl below) depends on mutable
/// fields, so every mutation must go through a repositioning path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Chat {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_timestamp: Option<u64>,
    #[serde(default)]
    pub unread_count: i64,
}

impl Chat {
    /// Minimal record synthesized when a message notification arrives for a
    /// chat the mirror has never seen.
    pub fn placeholder(id: String, name: Option<String>) -> Self {
        Self {
            id,
            name,
            pinned: false,
            archived: false,
            conversation_timestamp: None,
            unread_count: 0,
        }
    }
}

impl SortKeyed for Chat {
    fn id(&self) -> String {
        self.id.clone()
    }

    /// `{pin}{archive}{timestamp_hex}{id}`, compared descending.
    ///
    /// Pinned chats carry `'1'` so they rise; archived chats carry `'0'` so
    /// they sink.  The timestamp is fixed-width hex (absent → all zeros) and
    /// the id terminates the key, so no two chats ever compare equal.
    fn sort_key(&self) -> String {
        format!(
            "{}{}{:016x}{}",
            if self.pinned { '1' } else { '0' },
            if self.archived { '0' } else { '1' },
            self.conversation_timestamp.unwrap_or(0),
            self.id,
        )
    }
}

/// Identity of a message on the wire: chat, direction, and the id that is
/// unique within the chat's message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessageKey {
    pub remote_jid: String,
    pub id: String,
    #[serde(default)]
    pub from_me: bool,
}

/// A message as carried by sync events.  The body is unschematized; the
/// mirror stores whatever the session sent and never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Message {
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default)]
    pub content: Value,
}

impl Keyed for Message {
    fn key(&self) -> &str {
        &self.key.id
    }
}

/// A contact record.  Merging is a field-wise union: a field already known
/// is only lost when an event explicitly overwrites or clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
}

/// A label owned by the session.  At most twenty non-deleted labels exist at
/// any time; the cap is enforced by the repository, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
}

/// A many-to-many link between a label and either a whole chat or a single
/// message.  The composite key doubles as the sort key, so associations are
/// unique and iterate in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LabelAssociation {
    Chat {
        chat_id: String,
        label_id: String,
    },
    Message {
        chat_id: String,
        message_id: String,
        label_id: String,
    },
}

impl LabelAssociation {
    /// Composite key: chat-scoped rows key on chat + label, message-scoped
    /// rows additionally on the message id.
    pub fn composite_key(&self) -> String {
        match self {
            LabelAssociation::Chat { chat_id, label_id } => {
                format!("chat:{chat_id}:{label_id}")
            }
            LabelAssociation::Message {
                chat_id,
                message_id,
                label_id,
            } => format!("message:{chat_id}:{message_id}:{label_id}"),
        }
    }

    pub fn label_id(&self) -> &str {
        match self {
            LabelAssociation::Chat { label_id, .. } => label_id,
            LabelAssociation::Message { label_id, .. } => label_id,
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            LabelAssociation::Chat { chat_id, .. } => chat_id,
            LabelAssociation::Message { chat_id, .. } => chat_id,
        }
    }
}

impl SortKeyed for LabelAssociation {
    fn id(&self) -> String {
        self.composite_key()
    }

    fn sort_key(&self) -> String {
        self.composite_key()
    }
}

/// Presence states a participant can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Unavailable,
    Available,
    Composing,
    Recording,
    Paused,
}

/// Last reported presence of one participant within one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PresenceEntry {
    pub last_known_presence: Presence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

/// Per-chat presence map: participant JID → last reported state.
pub type ChatPresences = HashMap<String, PresenceEntry>;
