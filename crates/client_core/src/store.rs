//! The transcript of the open conversation, in display order.

use std::collections::HashSet;

use shared::domain::{Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub message: Message,
    /// Set on optimistic entries that carry media until the server confirms them.
    pub is_uploading: bool,
}

impl StoreEntry {
    pub fn confirmed(message: Message) -> Self {
        Self {
            message,
            is_uploading: false,
        }
    }

    pub fn optimistic(message: Message) -> Self {
        let is_uploading = message.has_media();
        Self {
            message,
            is_uploading,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStore {
    entries: Vec<StoreEntry>,
    /// Present between `begin_load` and `load`.
    pending: Option<PendingChanges>,
    /// Seen receipts for ids not (yet) in the store, e.g. a send whose reply is in flight.
    unmatched_seen: HashSet<MessageId>,
}

/// Pushes that landed while a transcript fetch was in flight, replayed over its result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PendingChanges {
    removed: HashSet<MessageId>,
    merged: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&StoreEntry> {
        self.entries.iter().find(|entry| &entry.message.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    pub fn temporary_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.message.id.is_temporary())
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending = None;
        self.unmatched_seen.clear();
    }

    /// Starts recording deletes, edits and reactions until the next `load`.
    pub fn begin_load(&mut self) {
        self.pending = Some(PendingChanges::default());
    }

    /// Drops whatever was recorded since `begin_load`; the fetch failed.
    pub fn abort_load(&mut self) {
        self.pending = None;
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Installs a freshly fetched transcript. Entries that arrived while the fetch was in
    /// flight and are not part of it stay at the end, and changes recorded since
    /// `begin_load` are replayed over the result.
    pub fn load(&mut self, messages: Vec<Message>) {
        let pending = self.pending.take().unwrap_or_default();
        let mut entries: Vec<StoreEntry> = messages
            .into_iter()
            .filter(|message| !pending.removed.contains(&message.id))
            .map(StoreEntry::confirmed)
            .collect();
        let late: Vec<StoreEntry> = self
            .entries
            .drain(..)
            .filter(|entry| !entries.iter().any(|e| e.message.id == entry.message.id))
            .collect();
        entries.extend(late);
        self.entries = entries;

        for update in &pending.merged {
            self.merge(update);
        }
        let seen: Vec<MessageId> = self.unmatched_seen.iter().cloned().collect();
        self.mark_seen(&seen);
    }

    pub fn push(&mut self, entry: StoreEntry) {
        self.entries.push(entry);
    }

    /// Appends a confirmed message, or merges it when the id is already present.
    pub fn upsert(&mut self, mut message: Message) {
        if !self.merge(&message) {
            self.settle_seen(&mut message);
            self.entries.push(StoreEntry::confirmed(message));
        }
    }

    /// Swaps the entry `id` for `message` at the same position.
    pub fn replace(&mut self, id: &MessageId, mut message: Message) -> bool {
        self.settle_seen(&mut message);
        match self.entries.iter_mut().find(|entry| &entry.message.id == id) {
            Some(entry) => {
                *entry = StoreEntry::confirmed(message);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        if let Some(pending) = &mut self.pending {
            pending.removed.insert(id.clone());
        }
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.message.id != id);
        self.entries.len() != before
    }

    /// Applies the mutable fields of `update` to the entry with the same id. No-op when
    /// the id is unknown, unless a load is pending.
    pub fn merge(&mut self, update: &Message) -> bool {
        if let Some(pending) = &mut self.pending {
            pending.merged.push(update.clone());
        }
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.message.id == update.id)
        {
            Some(entry) => {
                entry.message.merge_from(update);
                true
            }
            None => false,
        }
    }

    /// Returns how many entries flipped to seen. Ids that match nothing are kept and
    /// applied when the message shows up through `replace`, `upsert` or `load`.
    pub fn mark_seen(&mut self, ids: &[MessageId]) -> usize {
        let mut flipped = 0;
        for id in ids {
            match self.entries.iter_mut().find(|entry| &entry.message.id == id) {
                Some(entry) => {
                    self.unmatched_seen.remove(id);
                    if !entry.message.seen {
                        entry.message.seen = true;
                        flipped += 1;
                    }
                }
                None => {
                    self.unmatched_seen.insert(id.clone());
                }
            }
        }
        flipped
    }

    fn settle_seen(&mut self, message: &mut Message) {
        if self.unmatched_seen.remove(&message.id) {
            message.seen = true;
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
