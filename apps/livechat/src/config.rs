use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_CHANNEL_ID: i64 = 1;
pub const DEFAULT_GUEST_NAME: &str = "Guest";
pub const DEFAULT_ERROR_DELAY: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RETRY_JITTER_MAX: Duration = Duration::from_secs(20);
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(14 * 24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("origin server cannot be empty")]
    EmptyOrigin,
    #[error("invalid origin server url: {0}")]
    InvalidOrigin(String),
    #[error("channel id must be positive, got {0}")]
    InvalidChannel(i64),
    #[error("guest name cannot be blank")]
    BlankGuestName,
    #[error("history limit must be positive")]
    InvalidHistoryLimit,
    #[error("retry jitter must be at least one second")]
    InvalidJitter,
}

/// Chat client settings, fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Backend origin every RPC route is joined onto.
    pub origin_server: Url,
    /// Support queue the visitor is routed to.
    pub channel_id: i64,
    /// Display name for the visitor and for authors the backend marks unknown.
    pub guest_name: String,
    /// Base delay before a failed poll is retried.
    pub error_delay: Duration,
    /// Upper bound of the whole-second jitter added to `error_delay`.
    pub retry_jitter_max: Duration,
    pub history_limit: u32,
    /// How long a persisted conversation stays resumable without activity.
    pub activity_window: Duration,
}

impl ChatConfig {
    pub fn builder(origin_server: impl Into<String>) -> ChatConfigBuilder {
        ChatConfigBuilder::new(origin_server)
    }

    /// Load configuration from `LIVECHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let origin = env::var("LIVECHAT_ORIGIN").unwrap_or_else(|_| "127.0.0.1:8069".into());
        let mut builder = ChatConfig::builder(origin);
        if let Some(channel_id) = env::var("LIVECHAT_CHANNEL_ID")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            builder = builder.channel_id(channel_id);
        }
        if let Ok(name) = env::var("LIVECHAT_GUEST_NAME") {
            builder = builder.guest_name(name);
        }
        if let Some(delay_ms) = env::var("LIVECHAT_ERROR_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            builder = builder.error_delay(Duration::from_millis(delay_ms));
        }
        builder.build()
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfigBuilder {
    origin_server: String,
    channel_id: i64,
    guest_name: String,
    error_delay: Duration,
    retry_jitter_max: Duration,
    history_limit: u32,
    activity_window: Duration,
}

impl ChatConfigBuilder {
    fn new(origin_server: impl Into<String>) -> Self {
        Self {
            origin_server: origin_server.into(),
            channel_id: DEFAULT_CHANNEL_ID,
            guest_name: DEFAULT_GUEST_NAME.to_string(),
            error_delay: DEFAULT_ERROR_DELAY,
            retry_jitter_max: DEFAULT_RETRY_JITTER_MAX,
            history_limit: DEFAULT_HISTORY_LIMIT,
            activity_window: DEFAULT_ACTIVITY_WINDOW,
        }
    }

    pub fn channel_id(mut self, channel_id: i64) -> Self {
        self.channel_id = channel_id;
        self
    }

    pub fn guest_name(mut self, guest_name: impl Into<String>) -> Self {
        self.guest_name = guest_name.into();
        self
    }

    pub fn error_delay(mut self, delay: Duration) -> Self {
        self.error_delay = delay;
        self
    }

    pub fn retry_jitter_max(mut self, jitter: Duration) -> Self {
        self.retry_jitter_max = jitter;
        self
    }

    pub fn history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn activity_window(mut self, window: Duration) -> Self {
        self.activity_window = window;
        self
    }

    pub fn build(self) -> Result<ChatConfig, ConfigError> {
        let origin_server = parse_origin(&self.origin_server)?;
        if self.channel_id <= 0 {
            return Err(ConfigError::InvalidChannel(self.channel_id));
        }
        let guest_name = self.guest_name.trim().to_string();
        if guest_name.is_empty() {
            return Err(ConfigError::BlankGuestName);
        }
        if self.history_limit == 0 {
            return Err(ConfigError::InvalidHistoryLimit);
        }
        if self.retry_jitter_max < Duration::from_secs(1) {
            return Err(ConfigError::InvalidJitter);
        }
        Ok(ChatConfig {
            origin_server,
            channel_id: self.channel_id,
            guest_name,
            error_delay: self.error_delay,
            retry_jitter_max: self.retry_jitter_max,
            history_limit: self.history_limit,
            activity_window: self.activity_window,
        })
    }
}

fn parse_origin(raw: &str) -> Result<Url, ConfigError> {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(ConfigError::EmptyOrigin);
    }
    if !base.contains("://") {
        base = format!("{}{base}", infer_scheme(&base));
    }
    Url::parse(&base).map_err(|err| ConfigError::InvalidOrigin(format!("{base}: {err}")))
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower.starts_with("0.0.0.0")
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
        || host_lower
            .strip_prefix("172.")
            .and_then(|rest| rest.split('.').next())
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| (16..32).contains(&octet))
            .unwrap_or(false)
    {
        "http://"
    } else {
        "https://"
    }
}
