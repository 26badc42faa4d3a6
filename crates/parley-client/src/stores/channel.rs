//! Channel list, per-channel message timelines and memberships.
//!
//! Every fetch that writes per-channel state takes a generation number for
//! its `(kind, channel)` pair and only applies its response if no newer
//! request of the same kind for the same channel started in the meantime.
//! The state lock is never held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use parley_shared::constants::{HISTORY_PAGE_SIZE, MAX_PAGE_SIZE, RECENT_MESSAGES_LIMIT};
use parley_shared::models::{Channel, ChannelMember, LastMessage, Message, MessageType};
use parley_shared::rest::{ChannelPatch, CreateChannelRequest, SendMessageRequest};
use parley_shared::{ChannelId, LocalId, MessageId, UserId};

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::realtime::RealtimeClient;
use crate::session::SessionManager;
use crate::timeline::{ConfirmOutcome, DeliveryState, PendingMessage, PushOutcome, Timeline, TimelineEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FetchKind {
    Messages,
    History,
    Members,
}

/// Socket and ack changes to one channel while its recent-messages fetch is
/// in flight. They are applied on top of the fetched list.
#[derive(Debug, Default)]
struct FetchWindow {
    generation: u64,
    added: HashSet<MessageId>,
    removed: HashSet<MessageId>,
}

/// Result of loading an older page of messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryPage {
    /// Messages that were not already in the timeline.
    pub added: usize,
    pub has_more: bool,
    pub next_before_id: Option<MessageId>,
}

#[derive(Default)]
struct ChannelState {
    channels: Vec<Channel>,
    current: Option<ChannelId>,
    timelines: HashMap<ChannelId, Timeline>,
    members: HashMap<ChannelId, Vec<ChannelMember>>,
    has_more: HashMap<ChannelId, bool>,
    loading: bool,
    error: Option<String>,
    generations: HashMap<(FetchKind, ChannelId), u64>,
    windows: HashMap<ChannelId, FetchWindow>,
    list_generation: u64,
    switch_generation: u64,
}

impl ChannelState {
    fn next_generation(&mut self, kind: FetchKind, channel: ChannelId) -> u64 {
        let generation = self.generations.entry((kind, channel)).or_insert(0);
        *generation += 1;
        *generation
    }

    fn is_current(&self, kind: FetchKind, channel: ChannelId, generation: u64) -> bool {
        self.generations.get(&(kind, channel)).copied() == Some(generation)
    }

    fn note_added(&mut self, channel: ChannelId, id: MessageId) {
        if let Some(window) = self.windows.get_mut(&channel) {
            window.removed.remove(&id);
            window.added.insert(id);
        }
    }

    fn note_removed(&mut self, channel: Option<ChannelId>, id: MessageId) {
        for (window_channel, window) in self.windows.iter_mut() {
            if channel.map_or(true, |c| c == *window_channel) {
                window.added.remove(&id);
                window.removed.insert(id);
            }
        }
    }

    /// Apply a fetched recent-messages list, keeping what the socket added
    /// and dropping what it removed while the request was in flight.
    fn apply_recent(&mut self, channel: ChannelId, mut messages: Vec<Message>) {
        let window = self.windows.remove(&channel).unwrap_or_default();
        messages.retain(|m| !window.removed.contains(&m.id));

        let timeline = self.timeline(channel);
        let mut kept: Vec<Message> = window
            .added
            .iter()
            .filter(|id| !messages.iter().any(|m| m.id == **id))
            .filter_map(|id| timeline.get(*id).cloned())
            .collect();
        kept.sort_by_key(|m| m.id);
        messages.extend(kept);
        timeline.replace_confirmed(messages);
    }

    fn timeline(&mut self, channel: ChannelId) -> &mut Timeline {
        self.timelines.entry(channel).or_default()
    }

    fn touch_last_message(&mut self, channel: ChannelId) {
        let last = self
            .timelines
            .get(&channel)
            .and_then(Timeline::last_confirmed)
            .map(LastMessage::from);
        if let (Some(last), Some(ch)) = (last, self.channels.iter_mut().find(|c| c.id == channel)) {
            ch.last_message = Some(last);
        }
    }

    /// Channel holding the pending entry `local_id`, if any.
    fn channel_of_pending(&self, local_id: LocalId) -> Option<ChannelId> {
        self.timelines
            .iter()
            .find(|(_, t)| t.pending(local_id).is_some())
            .map(|(id, _)| *id)
    }

    /// Channel holding message `id`, looking at the active channel first.
    fn channel_of_message(&self, id: MessageId) -> Option<ChannelId> {
        if let Some(current) = self.current {
            if self.timelines.get(&current).is_some_and(|t| t.contains(id)) {
                return Some(current);
            }
        }
        self.timelines
            .iter()
            .find(|(_, t)| t.contains(id))
            .map(|(channel, _)| *channel)
    }
}

pub struct ChannelStore {
    api: ApiClient,
    session: Arc<SessionManager>,
    realtime: Arc<RealtimeClient>,
    events: EventBus,
    state: Mutex<ChannelState>,
}

impl ChannelStore {
    pub fn new(
        api: ApiClient,
        session: Arc<SessionManager>,
        realtime: Arc<RealtimeClient>,
        events: EventBus,
    ) -> Self {
        Self {
            api,
            session,
            realtime,
            events,
            state: Mutex::new(ChannelState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_error(&self, message: String) {
        let mut state = self.lock();
        state.loading = false;
        state.error = Some(message);
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn channels(&self) -> Vec<Channel> {
        self.lock().channels.clone()
    }

    pub fn public_channels(&self) -> Vec<Channel> {
        self.lock()
            .channels
            .iter()
            .filter(|c| !c.is_private && c.is_active)
            .cloned()
            .collect()
    }

    pub fn private_channels(&self) -> Vec<Channel> {
        self.lock()
            .channels
            .iter()
            .filter(|c| c.is_private && c.is_active)
            .cloned()
            .collect()
    }

    pub fn current_channel_id(&self) -> Option<ChannelId> {
        self.lock().current
    }

    pub fn current_channel(&self) -> Option<Channel> {
        let state = self.lock();
        let current = state.current?;
        state.channels.iter().find(|c| c.id == current).cloned()
    }

    pub fn messages(&self, channel: ChannelId) -> Vec<TimelineEntry> {
        self.lock()
            .timelines
            .get(&channel)
            .map(Timeline::entries)
            .unwrap_or_default()
    }

    pub fn current_messages(&self) -> Vec<TimelineEntry> {
        match self.current_channel_id() {
            Some(channel) => self.messages(channel),
            None => Vec::new(),
        }
    }

    pub fn members(&self, channel: ChannelId) -> Vec<ChannelMember> {
        self.lock().members.get(&channel).cloned().unwrap_or_default()
    }

    pub fn current_members(&self) -> Vec<ChannelMember> {
        match self.current_channel_id() {
            Some(channel) => self.members(channel),
            None => Vec::new(),
        }
    }

    /// Whether `user` may manage the active channel: its creator, or a
    /// member with the admin or owner role.
    pub fn is_channel_admin(&self, user: UserId) -> bool {
        let state = self.lock();
        let Some(current) = state.current else {
            return false;
        };
        let is_creator = state
            .channels
            .iter()
            .any(|c| c.id == current && c.creator_id == user);
        is_creator
            || state
                .members
                .get(&current)
                .is_some_and(|m| m.iter().any(|m| m.user_id == user && m.role.can_manage()))
    }

    pub fn has_more_history(&self, channel: ChannelId) -> bool {
        self.lock().has_more.get(&channel).copied().unwrap_or(true)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.lock().error = Some(message.clone());
        self.events.emit(ClientEvent::Error { message });
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    pub fn reset(&self) {
        *self.lock() = ChannelState::default();
        tracing::debug!("Channel store reset");
    }

    // -----------------------------------------------------------------------
    // Channel list
    // -----------------------------------------------------------------------

    /// Load public and own channels, public first, without duplicates. Picks
    /// the first channel as active when none is.
    pub async fn fetch_channels(&self) -> Result<Vec<Channel>> {
        let generation = {
            let mut state = self.lock();
            state.list_generation += 1;
            state.loading = true;
            state.error = None;
            state.list_generation
        };

        let (public, mine) = tokio::join!(self.api.public_channels(), self.api.my_channels());
        let public = match public {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch public channels");
                self.record_error(e.user_message());
                return Err(e.into());
            }
        };
        let mine = mine.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to fetch own channels, showing public ones only");
            Vec::new()
        });

        let mut merged = public;
        for channel in mine {
            if !merged.iter().any(|c| c.id == channel.id) {
                merged.push(channel);
            }
        }

        let selected = {
            let mut state = self.lock();
            if state.list_generation != generation {
                tracing::debug!("Discarding stale channel list");
                return Ok(merged);
            }
            state.loading = false;
            state.channels = merged.clone();
            let ids: Vec<ChannelId> = state.timelines.keys().copied().collect();
            for id in ids {
                state.touch_last_message(id);
            }
            match state.current {
                None => {
                    state.current = merged.first().map(|c| c.id);
                    state.current
                }
                Some(_) => None,
            }
        };

        tracing::info!(count = merged.len(), "Channels loaded");
        self.events.emit(ClientEvent::ChannelsUpdated);

        if let Some(channel_id) = selected {
            self.events.emit(ClientEvent::ChannelSwitched { channel_id });
            if let Err(e) = self.fetch_channel_messages(channel_id).await {
                tracing::warn!(channel = %channel_id, error = %e, "Failed to load messages of first channel");
            }
        }

        Ok(merged)
    }

    /// Make `channel_id` active, then load its messages and members and join
    /// its room. Failures of the follow-up steps are logged only.
    pub async fn switch_channel(&self, channel_id: ChannelId) -> Result<()> {
        let generation = {
            let mut state = self.lock();
            if !state.channels.iter().any(|c| c.id == channel_id) {
                drop(state);
                let err = ClientError::UnknownChannel(channel_id);
                self.lock().error = Some(err.to_string());
                return Err(err);
            }
            state.current = Some(channel_id);
            state.switch_generation += 1;
            state.switch_generation
        };
        tracing::info!(channel = %channel_id, "Switched channel");
        self.events.emit(ClientEvent::ChannelSwitched { channel_id });

        let (messages, members) = tokio::join!(
            self.fetch_channel_messages(channel_id),
            self.fetch_channel_members(channel_id)
        );
        if let Err(e) = messages {
            tracing::warn!(channel = %channel_id, error = %e, "Failed to load channel messages");
        }
        if let Err(e) = members {
            tracing::warn!(channel = %channel_id, error = %e, "Failed to load channel members");
        }

        if self.lock().switch_generation != generation {
            tracing::debug!(channel = %channel_id, "Switch superseded, not joining room");
            return Ok(());
        }
        if let Err(e) = self.realtime.join_channel(channel_id).await {
            tracing::warn!(channel = %channel_id, error = %e, "Failed to join channel room");
        }
        Ok(())
    }

    pub async fn create_channel(&self, request: CreateChannelRequest) -> Result<Option<Channel>> {
        self.lock().loading = true;
        let response = match self.api.create_channel(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.record_error(e.user_message());
                return Err(e.into());
            }
        };
        tracing::info!(name = %request.name, "Channel created");
        self.lock().loading = false;

        if let Err(e) = self.fetch_channels().await {
            tracing::warn!(error = %e, "Failed to refresh channels after create");
        }
        Ok(response.result)
    }

    pub async fn update_channel(&self, channel_id: ChannelId, patch: ChannelPatch) -> Result<()> {
        self.lock().loading = true;
        if let Err(e) = self.api.update_channel(channel_id, &patch).await {
            self.record_error(e.user_message());
            return Err(e.into());
        }
        {
            let mut state = self.lock();
            state.loading = false;
            if let Some(channel) = state.channels.iter_mut().find(|c| c.id == channel_id) {
                patch.apply_to(channel);
            }
        }
        self.events.emit(ClientEvent::ChannelsUpdated);
        Ok(())
    }

    pub async fn fetch_channel_members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>> {
        let generation = self.lock().next_generation(FetchKind::Members, channel_id);
        let members = match self.api.channel_members(channel_id).await {
            Ok(members) => members,
            Err(e) => {
                self.record_error(e.user_message());
                return Err(e.into());
            }
        };

        {
            let mut state = self.lock();
            if !state.is_current(FetchKind::Members, channel_id, generation) {
                return Ok(members);
            }
            state.members.insert(channel_id, members.clone());
        }
        self.events.emit(ClientEvent::MembersUpdated { channel_id });
        Ok(members)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Load the most recent messages of a channel. Optimistic entries survive.
    pub async fn fetch_channel_messages(&self, channel_id: ChannelId) -> Result<usize> {
        let generation = {
            let mut state = self.lock();
            let generation = state.next_generation(FetchKind::Messages, channel_id);
            state.windows.insert(
                channel_id,
                FetchWindow {
                    generation,
                    ..Default::default()
                },
            );
            generation
        };
        let messages = match self.api.recent_messages(channel_id, RECENT_MESSAGES_LIMIT).await {
            Ok(messages) => messages,
            Err(e) => {
                {
                    let mut state = self.lock();
                    if state.windows.get(&channel_id).is_some_and(|w| w.generation == generation) {
                        state.windows.remove(&channel_id);
                    }
                }
                self.record_error(e.user_message());
                return Err(e.into());
            }
        };

        let count = messages.len();
        {
            let mut state = self.lock();
            if !state.is_current(FetchKind::Messages, channel_id, generation) {
                tracing::debug!(channel = %channel_id, "Discarding stale message list");
                return Ok(count);
            }
            state.apply_recent(channel_id, messages);
            state
                .has_more
                .insert(channel_id, count >= RECENT_MESSAGES_LIMIT as usize);
            state.touch_last_message(channel_id);
        }
        tracing::debug!(channel = %channel_id, count, "Messages loaded");
        self.events
            .emit(ClientEvent::MessagesLoaded { channel_id, count });
        Ok(count)
    }

    /// Load a page older than `before_id` (default: the oldest loaded message)
    /// and merge it at the head. A 404 means no history is available.
    pub async fn load_history(
        &self,
        channel_id: ChannelId,
        before_id: Option<MessageId>,
        limit: Option<u32>,
    ) -> Result<HistoryPage> {
        let per_page = limit.unwrap_or(HISTORY_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let (generation, before_id) = {
            let mut state = self.lock();
            let before_id = before_id.or_else(|| {
                state
                    .timelines
                    .get(&channel_id)
                    .and_then(Timeline::oldest_confirmed_id)
            });
            (state.next_generation(FetchKind::History, channel_id), before_id)
        };

        let response = match self.api.history(channel_id, before_id, per_page).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                tracing::debug!(channel = %channel_id, "No history available");
                self.lock().has_more.insert(channel_id, false);
                return Ok(HistoryPage::default());
            }
            Err(e) => {
                self.record_error(e.user_message());
                return Err(e.into());
            }
        };

        let fetched = response.result.len();
        let (has_more, next_before_id) = match response.pagination {
            Some(p) => (p.has_next, p.next_before_id),
            None => (fetched >= per_page as usize, None),
        };

        let added = {
            let mut state = self.lock();
            if !state.is_current(FetchKind::History, channel_id, generation) {
                tracing::debug!(channel = %channel_id, "Discarding stale history page");
                return Ok(HistoryPage::default());
            }
            let added = state.timeline(channel_id).prepend_history(response.result);
            state.has_more.insert(channel_id, has_more);
            added
        };

        tracing::debug!(channel = %channel_id, ?before_id, fetched, added, has_more, "History loaded");
        self.events.emit(ClientEvent::HistoryLoaded {
            channel_id,
            count: added,
            has_more,
        });
        Ok(HistoryPage {
            added,
            has_more,
            next_before_id,
        })
    }

    /// Send a message optimistically. The entry appears at once in `Sending`
    /// state; it is then replaced by the server copy or marked `Failed`.
    pub async fn send_message(
        &self,
        content: &str,
        reply_to_id: Option<MessageId>,
        channel_id: Option<ChannelId>,
    ) -> Result<MessageId> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let channel_id = channel_id
            .or_else(|| self.current_channel_id())
            .ok_or(ClientError::NoActiveChannel)?;

        let pending = PendingMessage {
            local_id: LocalId::new(),
            channel_id,
            content: content.to_string(),
            reply_to_id,
            sender_id: self.session.user_id(),
            sender_name: self.session.display_name(),
            created_on: Utc::now(),
            state: DeliveryState::Sending,
        };
        let local_id = pending.local_id;
        self.lock().timeline(channel_id).push_pending(pending.clone());
        self.events
            .emit(ClientEvent::MessageQueued { channel_id, local_id });

        self.deliver(pending).await
    }

    /// Re-send a failed optimistic entry in place. An entry that is still
    /// being sent is refused with `MessageInFlight`.
    pub async fn retry_message(&self, local_id: LocalId) -> Result<MessageId> {
        let pending = {
            let mut state = self.lock();
            let channel = state
                .channel_of_pending(local_id)
                .ok_or(ClientError::UnknownMessage(local_id))?;
            state
                .timeline(channel)
                .mark_sending(local_id)
                .ok_or(ClientError::MessageInFlight(local_id))?
        };
        tracing::debug!(local_id = %local_id, "Retrying message");
        self.deliver(pending).await
    }

    async fn deliver(&self, pending: PendingMessage) -> Result<MessageId> {
        let PendingMessage {
            local_id,
            channel_id,
            ..
        } = pending;
        let request = SendMessageRequest {
            content: pending.content,
            message_type: MessageType::Text,
            reply_to_id: pending.reply_to_id,
            channel_id,
            client_id: local_id,
        };

        match self.api.send_message(&request).await {
            Ok(message) => {
                let message_id = message.id;
                let outcome = {
                    let mut state = self.lock();
                    let outcome = state.timeline(channel_id).confirm(local_id, message);
                    state.note_added(channel_id, message_id);
                    state.touch_last_message(channel_id);
                    outcome
                };
                tracing::debug!(channel = %channel_id, message = %message_id, ?outcome, "Message delivered");
                if outcome != ConfirmOutcome::DroppedDuplicate {
                    self.events.emit(ClientEvent::MessageConfirmed {
                        channel_id,
                        local_id,
                        message_id,
                    });
                }
                Ok(message_id)
            }
            Err(e) => {
                let error = e.user_message();
                let settled = {
                    let mut state = self.lock();
                    let timeline = state.timeline(channel_id);
                    if timeline.fail(local_id, error.clone()) {
                        state.error = Some(error.clone());
                        None
                    } else {
                        Some(timeline.delivered_id(local_id))
                    }
                };
                match settled {
                    Some(Some(message_id)) => {
                        tracing::debug!(channel = %channel_id, message = %message_id, error = %e, "Send failed after the message was already delivered");
                        return Ok(message_id);
                    }
                    Some(None) => {
                        tracing::debug!(channel = %channel_id, local_id = %local_id, error = %e, "Send failed for an entry that is gone");
                        return Err(e.into());
                    }
                    None => {}
                }
                tracing::warn!(channel = %channel_id, error = %e, "Message delivery failed");
                self.events.emit(ClientEvent::MessageFailed {
                    channel_id,
                    local_id,
                    error,
                });
                Err(e.into())
            }
        }
    }

    /// Delete a message on the server, then drop exactly that entry locally.
    pub async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        if let Err(e) = self.api.delete_message(message_id).await {
            self.record_error(e.user_message());
            return Err(e.into());
        }
        self.remove_message_from_channel(None, message_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Socket-driven mutations
    // -----------------------------------------------------------------------

    /// Apply a message pushed by the server. Returns whether anything changed.
    pub fn add_message_to_channel(&self, message: Message) -> bool {
        let channel_id = message.channel_id;
        let message_id = message.id;
        let outcome = {
            let mut state = self.lock();
            let outcome = state.timeline(channel_id).push_confirmed(message);
            if outcome != PushOutcome::Duplicate {
                state.note_added(channel_id, message_id);
                state.touch_last_message(channel_id);
            }
            outcome
        };

        match outcome {
            PushOutcome::Duplicate => {
                tracing::trace!(channel = %channel_id, message = %message_id, "Duplicate message ignored");
                false
            }
            PushOutcome::Inserted => {
                self.events.emit(ClientEvent::MessageAdded {
                    channel_id,
                    message_id,
                });
                true
            }
            PushOutcome::Reconciled(local_id) => {
                self.events.emit(ClientEvent::MessageConfirmed {
                    channel_id,
                    local_id,
                    message_id,
                });
                true
            }
        }
    }

    /// Drop message `message_id`; searches every channel when `channel_id`
    /// is not given. Returns whether an entry was removed.
    pub fn remove_message_from_channel(&self, channel_id: Option<ChannelId>, message_id: MessageId) -> bool {
        let removed_from = {
            let mut state = self.lock();
            state.note_removed(channel_id, message_id);
            let channel = channel_id
                .filter(|c| state.timelines.get(c).is_some_and(|t| t.contains(message_id)))
                .or_else(|| state.channel_of_message(message_id));
            let removed = match channel {
                Some(channel) => state.timeline(channel).remove(message_id).then_some(channel),
                None => None,
            };
            if let Some(channel) = removed {
                state.touch_last_message(channel);
            }
            removed
        };

        match removed_from {
            Some(channel_id) => {
                self.events.emit(ClientEvent::MessageRemoved {
                    channel_id,
                    message_id,
                });
                true
            }
            None => false,
        }
    }
}
