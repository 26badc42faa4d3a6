//! Ordered message list of one channel, mixing confirmed messages and
//! optimistic entries that are still waiting for the server.
//!
//! Entries live in numbered slots. The order of slots is the display order;
//! two indexes map server ids and local ids to slots so that reconciling an
//! optimistic entry replaces it in place without scanning the list.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use parley_shared::models::Message;
use parley_shared::{ChannelId, LocalId, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Sending,
    Failed(String),
}

/// A locally authored message not yet acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub local_id: LocalId,
    pub channel_id: ChannelId,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
    pub sender_id: Option<UserId>,
    pub sender_name: String,
    pub created_on: DateTime<Utc>,
    pub state: DeliveryState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEntry {
    Confirmed(Message),
    Pending(PendingMessage),
}

impl TimelineEntry {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Confirmed(m) => Some(m.id),
            Self::Pending(_) => None,
        }
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Self::Confirmed(m) => m.client_id,
            Self::Pending(p) => Some(p.local_id),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Confirmed(m) => &m.content,
            Self::Pending(p) => &p.content,
        }
    }

    pub fn sender_name(&self) -> &str {
        match self {
            Self::Confirmed(m) => &m.sender_name,
            Self::Pending(p) => &p.sender_name,
        }
    }

    pub fn created_on(&self) -> DateTime<Utc> {
        match self {
            Self::Confirmed(m) => m.created_on,
            Self::Pending(p) => p.created_on,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Inserted,
    /// Already present; nothing changed.
    Duplicate,
    /// Replaced the optimistic entry with this local id.
    Reconciled(LocalId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Replaced,
    /// The server copy was already in the list; the optimistic entry was dropped.
    DroppedDuplicate,
    /// No optimistic entry was left to replace; the message was appended.
    Inserted,
}

type Slot = u64;

#[derive(Debug, Default)]
pub struct Timeline {
    order: VecDeque<Slot>,
    entries: HashMap<Slot, TimelineEntry>,
    by_id: HashMap<MessageId, Slot>,
    by_local: HashMap<LocalId, Slot>,
    next_slot: Slot,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimelineEntry> + '_ {
        self.order.iter().filter_map(|slot| self.entries.get(slot))
    }

    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.iter().cloned().collect()
    }

    pub fn pending(&self, local_id: LocalId) -> Option<&PendingMessage> {
        match self.by_local.get(&local_id).and_then(|s| self.entries.get(s)) {
            Some(TimelineEntry::Pending(p)) => Some(p),
            _ => None,
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        match self.by_id.get(&id).and_then(|s| self.entries.get(s)) {
            Some(TimelineEntry::Confirmed(m)) => Some(m),
            _ => None,
        }
    }

    /// Server id of the confirmed message that settled `local_id`.
    pub fn delivered_id(&self, local_id: LocalId) -> Option<MessageId> {
        self.iter().find_map(|entry| match entry {
            TimelineEntry::Confirmed(m) if m.client_id == Some(local_id) => Some(m.id),
            _ => None,
        })
    }

    pub fn oldest_confirmed_id(&self) -> Option<MessageId> {
        self.iter().find_map(TimelineEntry::message_id)
    }

    pub fn last_confirmed(&self) -> Option<&Message> {
        self.order
            .iter()
            .rev()
            .filter_map(|slot| self.entries.get(slot))
            .find_map(|entry| match entry {
                TimelineEntry::Confirmed(m) => Some(m),
                TimelineEntry::Pending(_) => None,
            })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append a server message, deduplicating by id and reconciling with a
    /// pending entry that carries the same client id.
    pub fn push_confirmed(&mut self, message: Message) -> PushOutcome {
        if self.by_id.contains_key(&message.id) {
            return PushOutcome::Duplicate;
        }

        if let Some(local_id) = message.client_id {
            if let Some(&slot) = self.by_local.get(&local_id) {
                if matches!(self.entries.get(&slot), Some(TimelineEntry::Pending(_))) {
                    self.by_local.remove(&local_id);
                    self.by_id.insert(message.id, slot);
                    self.entries.insert(slot, TimelineEntry::Confirmed(message));
                    return PushOutcome::Reconciled(local_id);
                }
            }
        }

        let slot = self.alloc();
        self.by_id.insert(message.id, slot);
        self.entries.insert(slot, TimelineEntry::Confirmed(message));
        self.order.push_back(slot);
        PushOutcome::Inserted
    }

    /// Append an optimistic entry. Returns `false` if one with the same local
    /// id already exists.
    pub fn push_pending(&mut self, pending: PendingMessage) -> bool {
        if self.by_local.contains_key(&pending.local_id) {
            return false;
        }
        let slot = self.alloc();
        self.by_local.insert(pending.local_id, slot);
        self.entries.insert(slot, TimelineEntry::Pending(pending));
        self.order.push_back(slot);
        true
    }

    /// Settle the optimistic entry `local_id` with the server's copy.
    pub fn confirm(&mut self, local_id: LocalId, message: Message) -> ConfirmOutcome {
        let pending_slot = self.by_local.get(&local_id).copied().filter(|slot| {
            matches!(self.entries.get(slot), Some(TimelineEntry::Pending(_)))
        });

        if self.by_id.contains_key(&message.id) {
            if let Some(slot) = pending_slot {
                self.by_local.remove(&local_id);
                self.drop_slot(slot);
            }
            return ConfirmOutcome::DroppedDuplicate;
        }

        match pending_slot {
            Some(slot) => {
                self.by_local.remove(&local_id);
                self.by_id.insert(message.id, slot);
                self.entries.insert(slot, TimelineEntry::Confirmed(message));
                ConfirmOutcome::Replaced
            }
            None => {
                self.push_confirmed(message);
                ConfirmOutcome::Inserted
            }
        }
    }

    /// Mark an optimistic entry as failed. The entry stays in place.
    pub fn fail(&mut self, local_id: LocalId, error: impl Into<String>) -> bool {
        match self.pending_mut(local_id) {
            Some(p) => {
                p.state = DeliveryState::Failed(error.into());
                true
            }
            None => false,
        }
    }

    /// Flip a failed entry back to sending and return a copy for re-sending.
    /// Entries still in flight are left alone.
    pub fn mark_sending(&mut self, local_id: LocalId) -> Option<PendingMessage> {
        let p = self.pending_mut(local_id)?;
        if !matches!(p.state, DeliveryState::Failed(_)) {
            return None;
        }
        p.state = DeliveryState::Sending;
        Some(p.clone())
    }

    /// Remove the confirmed message `id`. Returns whether it was present.
    pub fn remove(&mut self, id: MessageId) -> bool {
        match self.by_id.remove(&id) {
            Some(slot) => {
                self.drop_slot(slot);
                true
            }
            None => false,
        }
    }

    pub fn remove_pending(&mut self, local_id: LocalId) -> bool {
        match self.by_local.get(&local_id).copied() {
            Some(slot) if matches!(self.entries.get(&slot), Some(TimelineEntry::Pending(_))) => {
                self.by_local.remove(&local_id);
                self.drop_slot(slot);
                true
            }
            _ => false,
        }
    }

    /// Insert an older page at the head. Messages already present are
    /// skipped; the rest keep chronological order. Returns how many were added.
    pub fn prepend_history(&mut self, mut page: Vec<Message>) -> usize {
        page.retain(|m| !self.by_id.contains_key(&m.id));
        page.sort_by_key(|m| m.id);
        page.dedup_by_key(|m| m.id);

        let added = page.len();
        for message in page.into_iter().rev() {
            let slot = self.alloc();
            self.by_id.insert(message.id, slot);
            self.entries.insert(slot, TimelineEntry::Confirmed(message));
            self.order.push_front(slot);
        }
        added
    }

    /// Replace every confirmed message with `messages` (oldest first).
    /// Optimistic entries are kept after them unless the new list already
    /// holds their server copy.
    pub fn replace_confirmed(&mut self, messages: Vec<Message>) {
        let pending: Vec<PendingMessage> = self
            .iter()
            .filter_map(|entry| match entry {
                TimelineEntry::Pending(p) => Some(p.clone()),
                TimelineEntry::Confirmed(_) => None,
            })
            .collect();

        self.order.clear();
        self.entries.clear();
        self.by_id.clear();
        self.by_local.clear();

        for message in messages {
            self.push_confirmed(message);
        }
        for p in pending {
            let delivered = self
                .iter()
                .any(|e| matches!(e, TimelineEntry::Confirmed(m) if m.client_id == Some(p.local_id)));
            if !delivered {
                self.push_pending(p);
            }
        }
    }

    fn pending_mut(&mut self, local_id: LocalId) -> Option<&mut PendingMessage> {
        let slot = self.by_local.get(&local_id)?;
        match self.entries.get_mut(slot) {
            Some(TimelineEntry::Pending(p)) => Some(p),
            _ => None,
        }
    }

    fn alloc(&mut self) -> Slot {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    fn drop_slot(&mut self, slot: Slot) {
        self.entries.remove(&slot);
        if let Some(pos) = self.order.iter().position(|s| *s == slot) {
            self.order.remove(pos);
        }
    }
}
