//! Shared wire definitions for the livechat RPC backend.
//! Keeping these in a dedicated crate lets other clients reuse the
//! envelope and payload shapes without pulling in the runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod author;

pub use author::Author;

pub const JSONRPC_VERSION: &str = "2.0";
pub const RPC_METHOD: &str = "call";

/// Logical endpoints exposed by the backend, relative to the origin server.
pub mod routes {
    pub const GEN_SESSION_ID: &str = "/gen_session_id";
    pub const INIT: &str = "/im_livechat/init";
    pub const GET_SESSION: &str = "/im_livechat/get_session";
    pub const CHAT_HISTORY: &str = "/mail/chat_history";
    pub const CHAT_POST: &str = "/mail/chat_post";
    pub const POLL: &str = "/longpolling/poll";
}

/// JSON-RPC 2.0 request envelope carried in the `r` query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: u64,
    pub params: Value,
}

impl RpcRequest {
    pub fn call(id: u64, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: RPC_METHOD.to_string(),
            id,
            params,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
    /// Session generation replies with the token at the top level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RpcResponse {
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitParams {
    pub channel_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetSessionParams {
    pub channel_id: i64,
    pub anonymous_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryParams {
    pub uuid: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostParams {
    pub uuid: String,
    pub message_content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollParams {
    pub channels: Vec<String>,
    pub last: i64,
    pub options: PollOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollOptions {
    /// Milliseconds since the visitor was last active.
    pub bus_inactivity: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitResult {
    #[serde(default)]
    pub available_for_me: Option<bool>,
}

impl InitResult {
    pub fn is_available(&self) -> bool {
        self.available_for_me == Some(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelSession {
    #[serde(default)]
    pub uuid: Option<String>,
}

/// A chat message as returned by history and embedded in notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author_id: Option<Value>,
}

/// One entry of the long-poll stream. Not every notification carries a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub message: Option<WireMessage>,
}
