//! In-memory containers backing the mirror.
//!
//! Three shapes cover every collection the reconciliation engine owns:
//!
//! - [`OrderedKeyedCollection`]: unique ids, iterated in descending order of
//!   a caller-supplied sort key that may depend on mutable fields (chats,
//!   label associations).
//! - [`OrderedAppendCollection`]: unique ids in insertion order, with
//!   position-aware insertion at either end (per-chat message lists).
//! - [`EntityRepository`]: a plain id-keyed store with a capacity ceiling
//!   (labels).
//!
//! None of these types lock: they assume a single logical writer, which the
//! engine guarantees by owning them behind `&mut self`.

use std::collections::{BTreeMap, HashMap, VecDeque};

/// An entity with a stable unique id.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// An entity with a stable unique id and a sort key derived from its current
/// field values.  The sort key must embed the id as its final component so
/// that no two entities ever compare equal.
pub trait SortKeyed {
    fn id(&self) -> String;
    fn sort_key(&self) -> String;
}

// ---------------------------------------------------------------------------
// OrderedKeyedCollection
// ---------------------------------------------------------------------------

/// Set of entities, uniquely keyed by id, iterable in descending order of
/// their current sort key.
///
/// The sort index is derived state and is re-established on every mutation,
/// including in-place updates via [`update`](Self::update) — a stale index
/// entry is exactly the bug class this type exists to prevent.
#[derive(Debug, Clone)]
pub struct OrderedKeyedCollection<T: SortKeyed> {
    items: HashMap<String, T>,
    /// sort key → id.  Keys are unique because the id terminates them.
    index: BTreeMap<String, String>,
}

impl<T: SortKeyed> Default for OrderedKeyedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SortKeyed> OrderedKeyedCollection<T> {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    /// Insert every item whose id is not already present; known ids are left
    /// untouched.  Returns how many items were actually inserted.
    ///
    /// Used when the incoming batch is lower-priority than already-known
    /// state (e.g. a history snapshot arriving after live updates).
    pub fn insert_if_absent<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut inserted = 0;
        for item in items {
            let id = item.id();
            if self.items.contains_key(&id) {
                continue;
            }
            self.index.insert(item.sort_key(), id.clone());
            self.items.insert(id, item);
            inserted += 1;
        }
        inserted
    }

    /// Insert or fully replace, always repositioning by the item's current
    /// sort key.
    pub fn upsert(&mut self, item: T) {
        let id = item.id();
        let sort_key = item.sort_key();
        if let Some(previous) = self.items.insert(id.clone(), item) {
            self.index.remove(&previous.sort_key());
        }
        self.index.insert(sort_key, id);
    }

    /// Apply `mutator` to the item with the given id, repositioning it if the
    /// mutation changed its sort key.  Returns `false` if the id is absent;
    /// whether that is reportable is the caller's call.
    pub fn update<F>(&mut self, id: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let Some(item) = self.items.get_mut(id) else {
            return false;
        };
        let old_key = item.sort_key();
        mutator(item);
        let new_key = item.sort_key();
        if new_key != old_key {
            self.index.remove(&old_key);
            self.index.insert(new_key, id.to_string());
        }
        true
    }

    pub fn delete(&mut self, item: &T) -> bool {
        self.delete_by_id(&item.id())
    }

    pub fn delete_by_id(&mut self, id: &str) -> bool {
        match self.items.remove(id) {
            Some(removed) => {
                self.index.remove(&removed.sort_key());
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    /// Iterate entities in descending sort-key order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.index.values().rev().filter_map(|id| self.items.get(id))
    }
}

// ---------------------------------------------------------------------------
// OrderedAppendCollection
// ---------------------------------------------------------------------------

/// Where a previously unknown item lands in an [`OrderedAppendCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    /// Before everything currently known (history predating live entries).
    Front,
    /// After everything currently known (live entries).
    Back,
}

/// List of entities uniquely keyed by id, preserving the order already-known
/// entries were given.
///
/// A repeated id replaces content in place without moving: a later
/// correction to a message must not reorder history.  No removal operation
/// exists; current event kinds never delete messages.
#[derive(Debug, Clone)]
pub struct OrderedAppendCollection<T: Keyed> {
    order: VecDeque<String>,
    items: HashMap<String, T>,
}

impl<T: Keyed> Default for OrderedAppendCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed> OrderedAppendCollection<T> {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
            items: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    /// Insert at the chosen end if the id is unknown; otherwise replace the
    /// content in place.  Returns `true` if the item was newly inserted.
    pub fn upsert(&mut self, item: T, position: InsertPosition) -> bool {
        let id = item.key().to_string();
        let newly_inserted = self.items.insert(id.clone(), item).is_none();
        if newly_inserted {
            match position {
                InsertPosition::Front => self.order.push_front(id),
                InsertPosition::Back => self.order.push_back(id),
            }
        }
        newly_inserted
    }

    /// Iterate front to back.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// The entry at the back of the list, if any.
    pub fn last(&self) -> Option<&T> {
        self.order.back().and_then(|id| self.items.get(id))
    }
}

// ---------------------------------------------------------------------------
// EntityRepository
// ---------------------------------------------------------------------------

/// Error from a rejected [`EntityRepository`] insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityError {
    pub capacity: usize,
}

impl std::fmt::Display for CapacityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "repository is at capacity ({} items)", self.capacity)
    }
}

impl std::error::Error for CapacityError {}

/// Plain id-keyed store with a capacity ceiling.
///
/// Replacing an existing id always succeeds; inserting a new id fails once
/// the ceiling is reached.  The count reflects currently stored items only.
#[derive(Debug, Clone)]
pub struct EntityRepository<T> {
    items: HashMap<String, T>,
    capacity: usize,
}

impl<T> EntityRepository<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    /// Insert or replace.  A new id is rejected when the repository is full;
    /// the item is not stored and the caller decides how to report it.
    pub fn upsert_by_id(&mut self, id: String, item: T) -> Result<(), CapacityError> {
        if !self.items.contains_key(&id) && self.items.len() >= self.capacity {
            return Err(CapacityError {
                capacity: self.capacity,
            });
        }
        self.items.insert(id, item);
        Ok(())
    }

    /// Remove unconditionally if present.  Returns whether anything was
    /// removed.
    pub fn delete_by_id(&mut self, id: &str) -> bool {
        self.items.remove(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.items.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
