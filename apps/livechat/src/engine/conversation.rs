use std::collections::VecDeque;

use livechat_proto::{Author, Notification, WireMessage};

use crate::events::ChatMessageEvent;

/// A message kept for replay within one process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub id: i64,
    pub body: String,
    pub author: Author,
}

impl CachedMessage {
    fn from_wire(message: &WireMessage, guest_label: &str) -> Option<Self> {
        Some(Self {
            id: message.id?,
            body: message.body.clone()?,
            author: Author::resolve(message.author_id.as_ref(), guest_label),
        })
    }

    fn to_event(&self) -> ChatMessageEvent {
        ChatMessageEvent {
            message: self.body.clone(),
            author_id: self.author.id,
            author_name: self.author.name.clone(),
            message_id: self.id,
        }
    }
}

/// Result of folding one poll batch into the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PollOutcome {
    /// New stream cursor, if it moved.
    pub cursor: Option<i64>,
    /// Messages to hand to the sink once the conversation lock is released.
    pub messages: Vec<ChatMessageEvent>,
}

/// Channel identity, both cursors and the replay cache.
///
/// `last_pooled_id` tracks the notification stream, `last_message_id` the
/// messages already handed to the sink. Both only move forward.
#[derive(Debug, Default)]
pub(crate) struct Conversation {
    pub channel_uuid: Option<String>,
    pub last_presence: Option<i64>,
    pub last_pooled_id: i64,
    pub last_message_id: i64,
    /// Newest first.
    history: VecDeque<CachedMessage>,
}

impl Conversation {
    pub fn history(&self) -> &VecDeque<CachedMessage> {
        &self.history
    }

    pub fn has_history(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn advance_pooled(&mut self, candidate: i64) {
        self.last_pooled_id = self.last_pooled_id.max(candidate);
    }

    /// Replaces the cache with a fetched page. Entries missing an id or a
    /// body are dropped. Returns the number of usable messages.
    pub fn replace_history(&mut self, page: &[WireMessage], guest_label: &str) -> usize {
        let mut messages: Vec<CachedMessage> = page
            .iter()
            .filter_map(|message| CachedMessage::from_wire(message, guest_label))
            .collect();
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.dedup_by_key(|message| message.id);
        self.history = messages.into();
        self.history.len()
    }

    /// Cached messages oldest first, skipping anything already delivered.
    /// The caller emits them after releasing the lock.
    pub fn replay(&mut self) -> Vec<ChatMessageEvent> {
        let pending: Vec<CachedMessage> = self.history.iter().rev().cloned().collect();
        pending
            .iter()
            .filter_map(|message| self.deliver(message))
            .collect()
    }

    /// Folds one poll batch into the cursors and collects new messages in
    /// arrival order.
    pub fn apply_notifications(&mut self, batch: &[Notification], guest_label: &str) -> PollOutcome {
        let before = self.last_pooled_id;
        let mut messages = Vec::new();
        for notification in batch {
            let Some(id) = notification.id else { continue };
            if id <= self.last_pooled_id {
                continue;
            }
            self.last_pooled_id = id;

            let Some(message) = notification
                .message
                .as_ref()
                .and_then(|message| CachedMessage::from_wire(message, guest_label))
            else {
                continue;
            };
            if let Some(event) = self.deliver(&message) {
                self.history.push_front(message);
                messages.push(event);
            }
        }
        PollOutcome {
            cursor: (self.last_pooled_id > before).then_some(self.last_pooled_id),
            messages,
        }
    }

    fn deliver(&mut self, message: &CachedMessage) -> Option<ChatMessageEvent> {
        if message.id <= self.last_message_id {
            return None;
        }
        self.last_message_id = message.id;
        Some(message.to_event())
    }
}
