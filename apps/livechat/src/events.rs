use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Canonical message unit handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageEvent {
    pub message: String,
    pub author_id: i64,
    pub author_name: String,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The support channel is staffed; the UI may offer the chat.
    Available,
    Message(ChatMessageEvent),
    Closed,
}

/// Receives engine events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChatEvent);
}

impl<F> EventSink for F
where
    F: Fn(ChatEvent) + Send + Sync,
{
    fn emit(&self, event: ChatEvent) {
        (self)(event)
    }
}

/// Forwards events into an unbounded channel; a dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::UnboundedSender<ChatEvent>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ChatEvent) {
        if self.0.send(event).is_err() {
            tracing::debug!(target: "livechat::events", "event receiver dropped");
        }
    }
}
