use std::sync::Weak;

use livechat_proto::{Notification, PollOptions, PollParams, routes};
use serde_json::Value;

use super::{ChatEngine, ChatError, EngineInner};
use crate::store::{KEY_LAST_POOLED_ID, now_millis};

/// Long-poll loop. Re-issues the poll immediately after a reply and backs
/// off after a failure; only cancellation or losing the channel ends it.
/// Holds the engine weakly so dropping every handle stops the loop.
pub(super) async fn run(handle: Weak<EngineInner>) {
    loop {
        let Some(inner) = handle.upgrade() else {
            break;
        };
        let engine = ChatEngine { inner };
        match poll_once(&engine).await {
            Ok(delivered) => {
                if delivered > 0 {
                    tracing::debug!(target: "livechat::engine", delivered, "poll delivered messages");
                }
            }
            Err(ChatError::NoChannel) => {
                tracing::debug!(target: "livechat::engine", "channel dropped; poll loop exiting");
                break;
            }
            Err(err) => {
                let delay = engine.retry_delay();
                tracing::warn!(
                    target: "livechat::engine",
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "poll failed; backing off"
                );
                drop(engine);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn poll_once(engine: &ChatEngine) -> Result<usize, ChatError> {
    let inner = &engine.inner;
    let params = {
        let conversation = inner.conversation.lock();
        let uuid = conversation.channel_uuid.clone().ok_or(ChatError::NoChannel)?;
        let inactivity = now_millis() - conversation.last_presence.unwrap_or(0);
        PollParams {
            channels: vec![uuid],
            last: conversation.last_pooled_id,
            options: PollOptions {
                bus_inactivity: inactivity.max(0),
            },
        }
    };

    let batch: Vec<Notification> = match inner.session.call(routes::POLL, &params).await? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    };

    let outcome = inner
        .conversation
        .lock()
        .apply_notifications(&batch, &inner.config.guest_name);
    if let Some(cursor) = outcome.cursor {
        engine.persist(KEY_LAST_POOLED_ID, &cursor.to_string());
    }
    let delivered = outcome.messages.len();
    engine.emit_messages(outcome.messages);
    Ok(delivered)
}
