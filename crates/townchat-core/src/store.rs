//! Per-conversation message store
//!
//! An ordered, append-friendly sequence rebuilt wholesale on history fetch and
//! appended to on live delivery. Order is always arrival order; timestamps are
//! never consulted.

use hashbrown::HashSet;

use crate::message::{Message, MessageId};

// ----------------------------------------------------------------------------
// Message Store
// ----------------------------------------------------------------------------

/// Ordered messages of the current conversation
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    /// Ids currently held, maintained only when deduplication is enabled
    seen: HashSet<MessageId>,
    dedup_by_id: bool,
    has_more: bool,
    stats: MessageStoreStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStoreStats {
    pub history_replacements: usize,
    pub live_appends: usize,
    pub duplicates_dropped: usize,
    pub local_echoes_reconciled: usize,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that drops messages whose id it already holds
    pub fn with_dedup(dedup_by_id: bool) -> Self {
        Self {
            dedup_by_id,
            ..Self::default()
        }
    }

    /// Replace the whole sequence with `messages`, given oldest-first
    pub fn replace_all(&mut self, messages: Vec<Message>, has_more: bool) {
        self.messages.clear();
        self.seen.clear();
        self.has_more = has_more;
        self.stats.history_replacements += 1;

        for message in messages {
            if self.is_duplicate(&message) {
                self.stats.duplicates_dropped += 1;
                continue;
            }
            self.remember(&message);
            self.messages.push(message);
        }
    }

    /// Append one live message at the end
    ///
    /// Returns `false` when deduplication dropped it.
    pub fn append(&mut self, message: Message) -> bool {
        if self.is_duplicate(&message) {
            self.stats.duplicates_dropped += 1;
            return false;
        }
        self.remember(&message);
        self.messages.push(message);
        self.stats.live_appends += 1;
        true
    }

    /// Append an optimistic entry for content this client just sent
    pub fn push_local(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Replace the oldest pending local echo matching `confirmed`
    ///
    /// Returns the confirmed message back when no pending echo matches so the
    /// caller can append it instead.
    pub fn reconcile_local(&mut self, confirmed: Message) -> Result<usize, Message> {
        if !confirmed.author_is_self || self.is_duplicate(&confirmed) {
            return Err(confirmed);
        }

        let position = self.messages.iter().position(|existing| {
            existing.is_local()
                && existing.kind == confirmed.kind
                && existing.content == confirmed.content
        });

        match position {
            Some(index) => {
                self.remember(&confirmed);
                self.messages[index] = confirmed;
                self.stats.local_echoes_reconciled += 1;
                Ok(index)
            }
            None => Err(confirmed),
        }
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.has_more = false;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the last history page reported older messages on the server
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn dedup_enabled(&self) -> bool {
        self.dedup_by_id
    }

    pub fn stats(&self) -> MessageStoreStats {
        self.stats
    }

    fn is_duplicate(&self, message: &Message) -> bool {
        match &message.id {
            Some(id) if self.dedup_by_id => self.seen.contains(id),
            _ => false,
        }
    }

    fn remember(&mut self, message: &Message) {
        if !self.dedup_by_id {
            return;
        }
        if let Some(id) = &message.id {
            self.seen.insert(id.clone());
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
