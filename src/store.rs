//! The reconciliation engine.
//!
//! [`MirrorStore`] owns every mirrored collection and applies synchronization
//! events to them, one at a time, in arrival order.  All merge, ordering,
//! identity-resolution, and capacity policy lives here; the collections
//! themselves are policy-free containers.
//!
//! The engine never halts and never raises to its caller: a malformed or
//! stale event is logged through [`mlog!`][crate::mlog] and dropped, because
//! the event stream is long-lived and one bad event must not stop the mirror
//! from consuming the next.  External consumers get shared references only —
//! the sort and capacity invariants hold only through the engine's own
//! mutation paths.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::collections::{
    EntityRepository, InsertPosition, OrderedAppendCollection, OrderedKeyedCollection,
};
use crate::events::{
    AssociationOp, ChatPatch, ContactPatch, HistorySyncPayload, LabelAssociationPayload,
    MessageUpsertKind, MessagesUpsertPayload, PresencePayload, SyncEvent,
};
use crate::identity::contact_fingerprint;
use crate::logging;
use crate::mlog;
use crate::model::{Chat, ChatPresences, Contact, Label, LabelAssociation, Message};

/// Most labels a session may hold at once.
pub const LABEL_CAPACITY: usize = 20;

/// Sentinel on `contacts.update` meaning "the picture changed, fetch it".
const IMG_URL_CHANGED: &str = "changed";
/// Sentinel on `contacts.update` meaning "the picture was removed".
const IMG_URL_REMOVED: &str = "removed";

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The one thing the engine asks of the messaging session: profile-picture
/// lookups for contacts whose picture changed.
///
/// The call is made inline from event application, so implementations must
/// bound their own latency; a source that blocks stalls every later event.
/// The engine works fine with no source configured — the picture field is
/// then left unset.
pub trait ProfilePictureSource {
    /// Current profile-picture URL for a contact, or `None` if the contact
    /// has none or the lookup failed.
    fn profile_picture_url(&self, jid: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Conditions the engine reports and survives.  None of these propagate;
/// the log channel is their only observable signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyIssue {
    /// Payload missing or empty where content is required.
    MalformedEvent {
        event: &'static str,
        reason: &'static str,
    },
    /// A tag value outside the known set.
    UnknownVariant { event: &'static str, tag: String },
    /// An insert rejected by a capacity ceiling.
    CapacityExceeded {
        entity: &'static str,
        id: String,
        capacity: usize,
    },
    /// An update or delete aimed at an id the mirror does not hold.
    ReferenceNotFound { entity: &'static str, id: String },
}

impl std::fmt::Display for ApplyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyIssue::MalformedEvent { event, reason } => {
                write!(f, "malformed {event} event: {reason}")
            }
            ApplyIssue::UnknownVariant { event, tag } => {
                write!(f, "unknown {event} tag {tag:?}")
            }
            ApplyIssue::CapacityExceeded {
                entity,
                id,
                capacity,
            } => write!(f, "{entity} {id:?} rejected: at capacity ({capacity})"),
            ApplyIssue::ReferenceNotFound { entity, id } => {
                write!(f, "{entity} {} not found", logging::jid(id))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Accumulated key/value fields describing session connectivity.  Each
/// update overwrites the keys it carries and leaves the rest alone.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateTracker {
    fields: Map<String, Value>,
}

impl ConnectionStateTracker {
    pub fn merge(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.fields.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// MirrorStore
// ---------------------------------------------------------------------------

/// Local, queryable mirror of remote conversational state.
///
/// Volatile: nothing persists unless a caller snapshots the exposed
/// collections.  `&mut self` on [`apply`](Self::apply) is the whole
/// concurrency story — one logical writer, no internal locking.
pub struct MirrorStore {
    chats: OrderedKeyedCollection<Chat>,
    messages: HashMap<String, OrderedAppendCollection<Message>>,
    contacts: HashMap<String, Contact>,
    presences: HashMap<String, ChatPresences>,
    labels: EntityRepository<Label>,
    label_associations: OrderedKeyedCollection<LabelAssociation>,
    group_metadata: HashMap<String, Value>,
    connection: ConnectionStateTracker,
    picture_source: Option<Box<dyn ProfilePictureSource>>,
}

impl Default for MirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorStore {
    pub fn new() -> Self {
        Self {
            chats: OrderedKeyedCollection::new(),
            messages: HashMap::new(),
            contacts: HashMap::new(),
            presences: HashMap::new(),
            labels: EntityRepository::with_capacity(LABEL_CAPACITY),
            label_associations: OrderedKeyedCollection::new(),
            group_metadata: HashMap::new(),
            connection: ConnectionStateTracker::default(),
            picture_source: None,
        }
    }

    /// Register the session collaborator used for profile-picture lookups.
    pub fn set_picture_source(&mut self, source: Box<dyn ProfilePictureSource>) {
        self.picture_source = Some(source);
    }

    pub fn clear_picture_source(&mut self) {
        self.picture_source = None;
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Drain an event source in order.  Each event runs to completion before
    /// the next is looked at.
    pub fn bind<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = SyncEvent>,
    {
        for event in events {
            self.apply(event);
        }
    }

    /// Apply one synchronization event.  Never fails: problems are logged
    /// and the event (or the offending item within it) is dropped.
    pub fn apply(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::ConnectionUpdate(fields) => self.apply_connection_update(fields),
            SyncEvent::MessagingHistorySet(payload) => self.apply_history_set(payload),
            SyncEvent::ContactsUpsert(contacts) => self.apply_contacts_upsert(contacts),
            SyncEvent::ContactsUpdate(patches) => self.apply_contacts_update(patches),
            SyncEvent::ChatsUpsert(chats) => self.apply_chats_upsert(chats),
            SyncEvent::ChatsUpdate(patches) => self.apply_chats_update(patches),
            SyncEvent::LabelsEdit(label) => self.apply_labels_edit(label),
            SyncEvent::LabelsAssociation(payload) => self.apply_labels_association(payload),
            SyncEvent::PresenceUpdate(payload) => self.apply_presence_update(payload),
            SyncEvent::ChatsDelete(ids) => self.apply_chats_delete(ids),
            SyncEvent::MessagesUpsert(payload) => self.apply_messages_upsert(payload),
        }
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn chats(&self) -> &OrderedKeyedCollection<Chat> {
        &self.chats
    }

    /// Message list for one chat, if any messages are known.
    pub fn messages(&self, jid: &str) -> Option<&OrderedAppendCollection<Message>> {
        self.messages.get(jid)
    }

    pub fn message(&self, jid: &str, id: &str) -> Option<&Message> {
        self.messages.get(jid).and_then(|list| list.get(id))
    }

    /// The newest known message in a chat (back of its list).
    pub fn most_recent_message(&self, jid: &str) -> Option<&Message> {
        self.messages.get(jid).and_then(|list| list.last())
    }

    pub fn contacts(&self) -> &HashMap<String, Contact> {
        &self.contacts
    }

    pub fn contact(&self, jid: &str) -> Option<&Contact> {
        self.contacts.get(jid)
    }

    pub fn presences(&self) -> &HashMap<String, ChatPresences> {
        &self.presences
    }

    pub fn labels(&self) -> &EntityRepository<Label> {
        &self.labels
    }

    pub fn label_associations(&self) -> &OrderedKeyedCollection<LabelAssociation> {
        &self.label_associations
    }

    pub fn connection_state(&self) -> &ConnectionStateTracker {
        &self.connection
    }

    /// Group metadata is a passthrough map: none of the sync events touch
    /// it, collaborators populate it via [`set_group_metadata`](Self::set_group_metadata).
    pub fn group_metadata(&self) -> &HashMap<String, Value> {
        &self.group_metadata
    }

    pub fn set_group_metadata(&mut self, id: String, metadata: Value) {
        self.group_metadata.insert(id, metadata);
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn report(&self, issue: ApplyIssue) {
        mlog!("reconcile: {issue}");
    }

    fn apply_connection_update(&mut self, fields: Map<String, Value>) {
        if fields.is_empty() {
            self.report(ApplyIssue::MalformedEvent {
                event: "connection.update",
                reason: "empty payload",
            });
            return;
        }
        self.connection.merge(fields);
    }

    /// A history snapshot.  `is_latest` makes it authoritative for chats and
    /// messages (full resync) but contacts are diffed, not replaced.
    fn apply_history_set(&mut self, payload: HistorySyncPayload) {
        if payload.is_latest {
            self.chats.clear();
            self.messages.clear();
        }

        // Already-known chats were shaped by more recent live events; the
        // snapshot must not overwrite them.
        let inserted = self.chats.insert_if_absent(payload.chats);

        if payload.is_latest {
            let keep: std::collections::HashSet<&str> =
                payload.contacts.iter().map(|c| c.id.as_str()).collect();
            let stale: Vec<String> = self
                .contacts
                .keys()
                .filter(|id| !keep.contains(id.as_str()))
                .cloned()
                .collect();
            for id in &stale {
                self.contacts.remove(id);
            }
            if !stale.is_empty() {
                mlog!("history: dropped {} contact(s) absent from snapshot", stale.len());
            }
        }
        for contact in payload.contacts {
            self.merge_contact(contact);
        }

        // Snapshot history predates anything already seen live.
        let message_count = payload.messages.len();
        for message in payload.messages {
            let jid = message.key.remote_jid.clone();
            self.message_list_mut(&jid)
                .upsert(message, InsertPosition::Front);
        }

        mlog!(
            "history: merged {inserted} chat(s), {message_count} message(s){}",
            if payload.is_latest { " (full resync)" } else { "" }
        );
    }

    fn apply_contacts_upsert(&mut self, contacts: Vec<Contact>) {
        for contact in contacts {
            self.merge_contact(contact);
        }
    }

    fn apply_contacts_update(&mut self, patches: Vec<ContactPatch>) {
        for patch in patches {
            self.apply_contact_patch(patch);
        }
    }

    fn apply_contact_patch(&mut self, patch: ContactPatch) {
        let Some(id) = self.resolve_contact_id(&patch.id) else {
            self.report(ApplyIssue::ReferenceNotFound {
                entity: "contact",
                id: patch.id,
            });
            return;
        };

        // Picture sentinels first.  "changed" asks the session for the new
        // URL; with no session configured the field is left unset.
        match patch.img_url.as_deref() {
            Some(IMG_URL_CHANGED) => {
                let fetched = self
                    .picture_source
                    .as_ref()
                    .and_then(|source| source.profile_picture_url(&id));
                if let Some(contact) = self.contacts.get_mut(&id) {
                    contact.img_url = fetched;
                }
            }
            Some(IMG_URL_REMOVED) => {
                if let Some(contact) = self.contacts.get_mut(&id) {
                    contact.img_url = None;
                }
            }
            // Any other value is not a picture instruction; the field stays.
            _ => {}
        }

        if let Some(contact) = self.contacts.get_mut(&id) {
            if let Some(name) = patch.name {
                contact.name = Some(name);
            }
            if let Some(notify) = patch.notify {
                contact.notify = Some(notify);
            }
        }
    }

    /// Resolve the id carried by a `contacts.update` to a mirrored contact.
    ///
    /// A direct id hit wins; otherwise every known contact's fingerprint is
    /// compared and the first match in map iteration order is taken.  With a
    /// three-character fingerprint this is best-effort identity resolution,
    /// not a uniqueness guarantee — under a collision the winner is
    /// non-deterministic.
    fn resolve_contact_id(&self, update_id: &str) -> Option<String> {
        if self.contacts.contains_key(update_id) {
            return Some(update_id.to_string());
        }
        self.contacts
            .keys()
            .find(|id| contact_fingerprint(id) == update_id)
            .cloned()
    }

    /// Field-wise union: an incoming field overwrites only when present.
    fn merge_contact(&mut self, incoming: Contact) {
        match self.contacts.get_mut(&incoming.id) {
            Some(existing) => {
                if incoming.name.is_some() {
                    existing.name = incoming.name;
                }
                if incoming.notify.is_some() {
                    existing.notify = incoming.notify;
                }
                if incoming.img_url.is_some() {
                    existing.img_url = incoming.img_url;
                }
            }
            None => {
                self.contacts.insert(incoming.id.clone(), incoming);
            }
        }
    }

    fn apply_chats_upsert(&mut self, chats: Vec<Chat>) {
        for chat in chats {
            self.chats.upsert(chat);
        }
    }

    fn apply_chats_update(&mut self, patches: Vec<ChatPatch>) {
        for patch in patches {
            let ChatPatch {
                id,
                name,
                pinned,
                archived,
                conversation_timestamp,
                unread_count,
            } = patch;

            let applied = self.chats.update(&id, |chat| {
                if let Some(name) = name {
                    chat.name = Some(name);
                }
                if let Some(pinned) = pinned {
                    chat.pinned = pinned;
                }
                if let Some(archived) = archived {
                    chat.archived = archived;
                }
                if let Some(timestamp) = conversation_timestamp {
                    chat.conversation_timestamp = Some(timestamp);
                }
                if let Some(unread) = unread_count {
                    // Positive counts accumulate; zero and negative values
                    // are literal overwrites (how the session reports
                    // mark-as-read).
                    if unread > 0 {
                        chat.unread_count += unread;
                    } else {
                        chat.unread_count = unread;
                    }
                }
            });

            // Updates never create chats; an unknown id is stale.
            if !applied {
                self.report(ApplyIssue::ReferenceNotFound {
                    entity: "chat",
                    id,
                });
            }
        }
    }

    fn apply_labels_edit(&mut self, label: Label) {
        if label.deleted {
            self.labels.delete_by_id(&label.id);
            return;
        }
        let id = label.id.clone();
        if let Err(err) = self.labels.upsert_by_id(id.clone(), label) {
            self.report(ApplyIssue::CapacityExceeded {
                entity: "label",
                id,
                capacity: err.capacity,
            });
        }
    }

    fn apply_labels_association(&mut self, payload: LabelAssociationPayload) {
        match payload.op {
            AssociationOp::Add => {
                self.label_associations.upsert(payload.association);
            }
            AssociationOp::Remove => {
                self.label_associations
                    .delete_by_id(&payload.association.composite_key());
            }
            AssociationOp::Unknown(tag) => {
                self.report(ApplyIssue::UnknownVariant {
                    event: "labels.association",
                    tag,
                });
            }
        }
    }

    /// Additive merge: participants accumulate, stale ones are never
    /// evicted.
    fn apply_presence_update(&mut self, payload: PresencePayload) {
        let chat = self.presences.entry(payload.id).or_default();
        for (participant, entry) in payload.presences {
            match chat.get_mut(&participant) {
                Some(existing) => {
                    existing.last_known_presence = entry.last_known_presence;
                    if entry.last_seen.is_some() {
                        existing.last_seen = entry.last_seen;
                    }
                }
                None => {
                    chat.insert(participant, entry);
                }
            }
        }
    }

    fn apply_chats_delete(&mut self, ids: Vec<String>) {
        for id in ids {
            // Absent ids are silently ignored.
            if self.chats.delete_by_id(&id) {
                mlog!("reconcile: deleted chat {}", logging::jid(&id));
            }
        }
    }

    fn apply_messages_upsert(&mut self, payload: MessagesUpsertPayload) {
        let notify = match payload.kind {
            MessageUpsertKind::Append => false,
            MessageUpsertKind::Notify => true,
            MessageUpsertKind::Unknown(tag) => {
                self.report(ApplyIssue::UnknownVariant {
                    event: "messages.upsert",
                    tag,
                });
                return;
            }
        };

        for message in payload.messages {
            let jid = message.key.remote_jid.clone();

            // A notification may land in a chat the mirror has never seen.
            // Synthesize it with a direct call on the chat collection — not
            // a re-entrant dispatch through `apply`.
            if notify && self.chats.get(&jid).is_none() {
                let placeholder = Chat::placeholder(jid.clone(), message.push_name.clone());
                self.chats.upsert(placeholder);
                mlog!(
                    "reconcile: synthesized chat {} for {}",
                    logging::jid(&jid),
                    logging::msg_id(&message.key.id)
                );
            }

            self.message_list_mut(&jid)
                .upsert(message, InsertPosition::Back);
        }
    }

    /// Get-or-create the message list of a chat.  The single growth choke
    /// point for message state.
    fn message_list_mut(&mut self, jid: &str) -> &mut OrderedAppendCollection<Message> {
        self.messages
            .entry(jid.to_string())
            .or_insert_with(OrderedAppendCollection::new)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
