pub mod config;
pub mod engine;
pub mod events;
pub mod presentation;
pub mod session;
pub mod store;
pub mod telemetry;

pub use config::{ChatConfig, ConfigError};
pub use engine::{CachedMessage, ChatEngine, ChatError, EngineState};
pub use events::{ChannelSink, ChatEvent, ChatMessageEvent, EventSink};
pub use session::{ReqwestRpcTransport, RpcTransport, SessionError, SessionManager};
pub use store::{ActivityRecord, ActivityStore, FileActivityStore, MemoryActivityStore, StoreError};
