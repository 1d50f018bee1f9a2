//! Chat synchronization engine.
//!
//! Owns the channel identity, both message cursors, the replay cache and
//! the long-poll task. All backend traffic goes through [`SessionManager`];
//! everything the UI needs arrives through the injected [`EventSink`].

mod conversation;
mod poll;


use std::sync::Arc;
use std::time::Duration;

use livechat_proto::{
    ChannelSession, GetSessionParams, HistoryParams, InitParams, InitResult, PostParams,
    WireMessage, routes,
};
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ChatConfig;
use crate::events::{ChatEvent, ChatMessageEvent, EventSink};
use crate::session::{SessionError, SessionManager};
use crate::store::{ActivityRecord, ActivityStore, KEY_CHANNEL, KEY_LAST_PRESENCE, now_millis};

pub use conversation::CachedMessage;
use conversation::Conversation;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("chat is not available on this channel")]
    Unavailable,
    #[error("no conversation channel is assigned")]
    NoChannel,
    #[error("backend did not assign a conversation channel")]
    ChannelRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    AvailabilityUnknown,
    Available,
    /// Nobody staffs the channel; the engine stays dormant.
    Unavailable,
    ChannelUnassigned,
    ChannelActive,
    Polling,
    Closed,
}

impl EngineState {
    fn accepts_requests(self) -> bool {
        !matches!(
            self,
            EngineState::Uninitialized | EngineState::AvailabilityUnknown | EngineState::Unavailable
        )
    }
}

/// Cloneable handle to one visitor conversation.
#[derive(Clone)]
pub struct ChatEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: ChatConfig,
    session: SessionManager,
    store: Option<Arc<dyn ActivityStore>>,
    sink: Arc<dyn EventSink>,
    state: Mutex<EngineState>,
    conversation: Mutex<Conversation>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ChatEngine {
    pub fn new(
        config: ChatConfig,
        session: SessionManager,
        store: Option<Arc<dyn ActivityStore>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                session,
                store,
                sink,
                state: Mutex::new(EngineState::Uninitialized),
                conversation: Mutex::new(Conversation::default()),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Builds an engine talking to `config.origin_server` over HTTP.
    pub fn connect(
        config: ChatConfig,
        store: Option<Arc<dyn ActivityStore>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ChatError> {
        let session = SessionManager::new(&config)?;
        Ok(Self::new(config, session, store, sink))
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    pub fn channel_uuid(&self) -> Option<String> {
        self.inner.conversation.lock().channel_uuid.clone()
    }

    pub fn last_pooled_id(&self) -> i64 {
        self.inner.conversation.lock().last_pooled_id
    }

    pub fn last_message_id(&self) -> i64 {
        self.inner.conversation.lock().last_message_id
    }

    /// Cached messages, newest first.
    pub fn history(&self) -> Vec<CachedMessage> {
        self.inner.conversation.lock().history().iter().cloned().collect()
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// True when a channel id was persisted by an earlier run, valid or not.
    pub fn has_persisted_channel(&self) -> bool {
        self.inner
            .store
            .as_ref()
            .is_some_and(|store| store.get(KEY_CHANNEL).is_some())
    }

    /// Acquires a session token, then asks whether the channel is staffed.
    /// Emits [`ChatEvent::Available`] only on an explicit yes.
    pub async fn init(&self) -> Result<bool, ChatError> {
        self.set_state(EngineState::AvailabilityUnknown);
        self.inner.session.acquire().await?;

        let params = InitParams {
            channel_id: self.inner.config.channel_id,
        };
        let available = self
            .inner
            .session
            .call_as::<_, InitResult>(routes::INIT, &params)
            .await?
            .is_some_and(|result| result.is_available());

        if available {
            self.set_state(EngineState::Available);
            self.inner.sink.emit(ChatEvent::Available);
        } else {
            self.set_state(EngineState::Unavailable);
        }
        tracing::info!(
            target: "livechat::engine",
            channel_id = self.inner.config.channel_id,
            available,
            "availability checked"
        );
        Ok(available)
    }

    /// Validates the persisted activity record and adopts it.
    ///
    /// An expired record is purged from the store. Without a store nothing
    /// can be resumed.
    pub fn is_channel_active(&self) -> bool {
        let Some(store) = self.inner.store.as_deref() else {
            return false;
        };
        let record = ActivityRecord::load(store);
        if record.is_expired(now_millis(), self.inner.config.activity_window) {
            if let Err(err) = ActivityRecord::purge(store) {
                tracing::warn!(target: "livechat::store", error = %err, "failed to purge activity record");
            } else {
                tracing::debug!(target: "livechat::engine", "expired activity record purged");
            }
            return false;
        }
        let Some(uuid) = record.channel_uuid else {
            return false;
        };

        let mut conversation = self.inner.conversation.lock();
        if conversation.channel_uuid.as_deref() != Some(uuid.as_str()) {
            conversation.clear_history();
        }
        conversation.channel_uuid = Some(uuid);
        conversation.last_presence = record.last_presence;
        conversation.advance_pooled(record.last_pooled_id.unwrap_or(0));
        true
    }

    /// Opens the chat: resumes the persisted conversation if it is still
    /// valid, otherwise requests a new channel.
    pub async fn open(&self) -> Result<(), ChatError> {
        self.ensure_accepting()?;
        if !self.is_channel_active() {
            return self.acquire_channel().await;
        }
        self.set_state(EngineState::ChannelActive);

        let replayed_cache = {
            let mut conversation = self.inner.conversation.lock();
            if conversation.has_history() {
                Some(conversation.replay())
            } else {
                None
            }
        };
        match replayed_cache {
            Some(messages) => {
                tracing::debug!(target: "livechat::engine", replayed = messages.len(), "replayed cached history");
                self.emit_messages(messages);
            }
            None => {
                if !self.fetch_history().await? {
                    return self.acquire_channel().await;
                }
            }
        }
        self.start_polling();
        Ok(())
    }

    /// Silently resumes a persisted conversation. Never creates a channel.
    /// Returns whether a conversation was resumed.
    pub async fn load(&self) -> Result<bool, ChatError> {
        self.ensure_accepting()?;
        if !self.is_channel_active() {
            return Ok(false);
        }
        if !self.fetch_history().await? {
            self.forget_channel();
            return Ok(false);
        }
        self.set_state(EngineState::ChannelActive);
        self.start_polling();
        Ok(true)
    }

    /// Posts a visitor message and makes sure the poll loop is running so
    /// the server-assigned copy comes back.
    pub async fn send(&self, text: &str) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let uuid = self.channel_uuid().ok_or(ChatError::NoChannel)?;
        self.touch_presence();

        let params = PostParams {
            uuid,
            message_content: sanitize(text),
        };
        self.inner.session.call(routes::CHAT_POST, &params).await?;
        self.start_polling();
        Ok(())
    }

    /// Spawns the long-poll loop unless it is already running.
    pub fn start_polling(&self) {
        let mut poller = self.inner.poller.lock();
        if poller.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        if self.channel_uuid().is_none() {
            tracing::debug!(target: "livechat::engine", "no channel; not polling");
            return;
        }
        self.set_state(EngineState::Polling);
        *poller = Some(tokio::spawn(poll::run(Arc::downgrade(&self.inner))));
    }

    /// Tears the conversation view down: stops polling and emits
    /// [`ChatEvent::Closed`]. The next `open` replays the cache in full.
    pub fn close(&self) {
        if let Some(task) = self.inner.poller.lock().take() {
            task.abort();
        }
        self.inner.conversation.lock().last_message_id = 0;
        self.set_state(EngineState::Closed);
        self.inner.sink.emit(ChatEvent::Closed);
    }

    async fn fetch_history(&self) -> Result<bool, ChatError> {
        let uuid = self.channel_uuid().ok_or(ChatError::NoChannel)?;
        let params = HistoryParams {
            uuid,
            limit: self.inner.config.history_limit,
        };
        let page: Vec<WireMessage> = match self.inner.session.call(routes::CHAT_HISTORY, &params).await? {
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        };
        if page.is_empty() {
            tracing::debug!(target: "livechat::engine", "history empty; channel considered stale");
            return Ok(false);
        }

        let (kept, messages) = {
            let mut conversation = self.inner.conversation.lock();
            let kept = conversation.replace_history(&page, &self.inner.config.guest_name);
            (kept, conversation.replay())
        };
        tracing::debug!(target: "livechat::engine", kept, delivered = messages.len(), "history fetched");
        self.emit_messages(messages);
        Ok(true)
    }

    /// Sinks may call back into the engine, so this never runs under the
    /// conversation lock.
    fn emit_messages(&self, messages: Vec<ChatMessageEvent>) {
        for message in messages {
            self.inner.sink.emit(ChatEvent::Message(message));
        }
    }

    async fn acquire_channel(&self) -> Result<(), ChatError> {
        self.set_state(EngineState::ChannelUnassigned);
        let params = GetSessionParams {
            channel_id: self.inner.config.channel_id,
            anonymous_name: self.inner.config.guest_name.clone(),
        };
        let uuid = self
            .inner
            .session
            .call_as::<_, ChannelSession>(routes::GET_SESSION, &params)
            .await?
            .and_then(|session| session.uuid)
            .filter(|uuid| !uuid.trim().is_empty())
            .ok_or(ChatError::ChannelRejected)?;

        {
            let mut conversation = self.inner.conversation.lock();
            conversation.channel_uuid = Some(uuid.clone());
            conversation.clear_history();
        }
        self.persist(KEY_CHANNEL, &uuid);
        self.touch_presence();
        tracing::info!(target: "livechat::engine", channel = %uuid, "conversation channel assigned");

        self.set_state(EngineState::ChannelActive);
        self.start_polling();
        Ok(())
    }

    fn forget_channel(&self) {
        if let Some(store) = self.inner.store.as_deref() {
            if let Err(err) = ActivityRecord::purge(store) {
                tracing::warn!(target: "livechat::store", error = %err, "failed to purge activity record");
            }
        }
        let mut conversation = self.inner.conversation.lock();
        conversation.channel_uuid = None;
        conversation.clear_history();
    }

    fn touch_presence(&self) {
        let now = now_millis();
        self.inner.conversation.lock().last_presence = Some(now);
        self.persist(KEY_LAST_PRESENCE, &now.to_string());
    }

    fn persist(&self, key: &str, value: &str) {
        if let Some(store) = self.inner.store.as_deref() {
            if let Err(err) = store.set(key, value) {
                tracing::warn!(target: "livechat::store", key, error = %err, "failed to persist activity key");
            }
        }
    }

    fn ensure_accepting(&self) -> Result<(), ChatError> {
        if self.state().accepts_requests() {
            Ok(())
        } else {
            Err(ChatError::Unavailable)
        }
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.inner.state.lock();
        let previous = *state;
        if previous != next {
            tracing::trace!(target: "livechat::engine", from = ?previous, to = ?next, "state change");
            *state = next;
        }
    }

    fn retry_delay(&self) -> Duration {
        let jitter_max = self.inner.config.retry_jitter_max.as_secs().max(1);
        let jitter = rand::thread_rng().gen_range(1..=jitter_max);
        self.inner.config.error_delay + Duration::from_secs(jitter)
    }
}

/// Escapes markup-significant characters in outbound text.
pub fn sanitize(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}
