use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use livechat_proto::{RpcRequest, RpcResponse, routes};
use parking_lot::RwLock;
use rand::Rng;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::ChatConfig;

/// Request ids are only used for correlation on the backend side.
const REQUEST_ID_SPACE: u64 = 999_999_000;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Carries one RPC envelope to the backend and returns its decoded reply.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &Url,
        session_id: Option<&str>,
        request: &RpcRequest,
    ) -> Result<RpcResponse, SessionError>;
}

/// Ephemeral backend session scoped to one origin server.
///
/// The token is assigned at most once, by [`SessionManager::acquire`]; every
/// later call carries it. Without a token calls go out anonymously.
#[derive(Clone)]
pub struct SessionManager {
    origin: Url,
    transport: Arc<dyn RpcTransport>,
    session_id: Arc<RwLock<Option<String>>>,
}

impl SessionManager {
    pub fn new(config: &ChatConfig) -> Result<Self, SessionError> {
        let transport = Arc::new(ReqwestRpcTransport::new()?);
        Ok(Self::with_transport(config.origin_server.clone(), transport))
    }

    pub fn with_transport(origin: Url, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            origin,
            transport,
            session_id: Arc::new(RwLock::new(None)),
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Asks the backend for a session token and keeps it for later calls.
    pub async fn acquire(&self) -> Result<Option<String>, SessionError> {
        let response = self
            .dispatch(routes::GEN_SESSION_ID, Value::Object(Default::default()))
            .await?;
        let token = response.session_id.clone().or_else(|| {
            response
                .result
                .as_ref()
                .and_then(|result| result.get("session_id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        match token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => {
                let mut slot = self.session_id.write();
                if slot.is_none() {
                    *slot = Some(token.to_string());
                }
                tracing::debug!(target: "livechat::session", origin = %self.origin, "session token acquired");
            }
            None => {
                tracing::debug!(
                    target: "livechat::session",
                    origin = %self.origin,
                    "backend returned no session token; continuing anonymously"
                );
            }
        }
        Ok(self.session_id())
    }

    /// Issues one RPC call and returns the `result` payload, if any.
    pub async fn call<P: Serialize>(
        &self,
        route: &str,
        params: &P,
    ) -> Result<Option<Value>, SessionError> {
        let params = serde_json::to_value(params)
            .map_err(|err| SessionError::InvalidConfig(format!("unserializable params: {err}")))?;
        let response = self.dispatch(route, params).await?;
        if let Some(error) = response.error {
            return Err(SessionError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.filter(|value| !value.is_null()))
    }

    /// Like [`SessionManager::call`] but decodes the payload into `T`.
    pub async fn call_as<P: Serialize, T: DeserializeOwned>(
        &self,
        route: &str,
        params: &P,
    ) -> Result<Option<T>, SessionError> {
        match self.call(route, params).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| SessionError::InvalidResponse(format!("{route}: {err}"))),
            None => Ok(None),
        }
    }

    async fn dispatch(&self, route: &str, params: Value) -> Result<RpcResponse, SessionError> {
        let endpoint = route_url(&self.origin, route)?;
        let request = RpcRequest::call(next_request_id(), params);
        let session_id = self.session_id();
        tracing::trace!(target: "livechat::session", route, request_id = request.id, "rpc call");
        self.transport
            .send(&endpoint, session_id.as_deref(), &request)
            .await
    }
}

fn next_request_id() -> u64 {
    rand::thread_rng().gen_range(0..REQUEST_ID_SPACE)
}

fn route_url(origin: &Url, route: &str) -> Result<Url, SessionError> {
    let base = origin.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}{route}"))
        .map_err(|err| SessionError::InvalidConfig(format!("invalid endpoint for {route}: {err}")))
}

pub struct ReqwestRpcTransport {
    client: reqwest::Client,
}

impl ReqwestRpcTransport {
    pub fn new() -> Result<Self, SessionError> {
        // No request timeout: long-poll calls are held open by the server.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for ReqwestRpcTransport {
    async fn send(
        &self,
        endpoint: &Url,
        session_id: Option<&str>,
        request: &RpcRequest,
    ) -> Result<RpcResponse, SessionError> {
        let envelope = serde_json::to_string(request)
            .map_err(|err| SessionError::InvalidConfig(format!("unserializable envelope: {err}")))?;
        let response = self
            .client
            .get(endpoint.clone())
            .query(&[("session_id", session_id.unwrap_or_default()), ("r", envelope.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SessionError::HttpStatus(response.status()));
        }
        let body = response.text().await?;
        decode_response(&body)
    }
}

/// Decodes a reply body, unwrapping a `callback(...)` JSONP wrapper if present.
pub fn decode_response(body: &str) -> Result<RpcResponse, SessionError> {
    let trimmed = body.trim().trim_end_matches(';').trim_end();
    let json = if trimmed.starts_with('{') {
        trimmed
    } else {
        match (trimmed.find('('), trimmed.rfind(')')) {
            (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
            _ => trimmed,
        }
    };
    serde_json::from_str(json).map_err(|err| SessionError::InvalidResponse(err.to_string()))
}
