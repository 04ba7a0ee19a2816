//! Remote authority interface.
//!
//! The engine talks to the remote through [`RemoteAuthority`]. Responses are
//! returned as status plus body; turning them into queue outcomes is the
//! orchestrator's job (see [`crate::sync::classify`]). Transport failures are
//! [`RemoteError`]s.

mod http;

pub use http::HttpRemote;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RemoteError;
use crate::models::{PendingOperation, SyncAction};

/// One replayed mutation
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub action: SyncAction,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
}

impl From<&PendingOperation> for RemoteRequest {
    fn from(operation: &PendingOperation) -> Self {
        Self {
            action: operation.action,
            entity_type: operation.entity_type.clone(),
            entity_id: operation.entity_id.clone(),
            payload: operation.payload.clone(),
        }
    }
}

/// What the remote answered
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
    /// Human-readable error extracted from a non-2xx body
    pub message: Option<String>,
}

impl RemoteResponse {
    pub const fn new(status: u16) -> Self {
        Self {
            status,
            body: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Server-assigned id from the body's `id` field
    pub fn server_id(&self) -> Option<String> {
        match self.body.as_ref()?.get("id")? {
            serde_json::Value::String(id) => {
                let id = id.trim();
                (!id.is_empty()).then(|| id.to_string())
            }
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Error text for logs and `last_error`
    pub fn describe(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Replay one mutation
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError>;

    /// Lightweight reachability check
    async fn probe(&self) -> Result<(), RemoteError>;
}

/// Supplies the bearer token at call time; the engine never stores it
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// Unauthenticated access
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToken;

impl TokenSource for NoToken {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Extract a readable message from an API error body
pub(crate) fn parse_api_error(status: u16, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({status})", message.trim());
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("{trimmed} ({status})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn server_id_reads_string_or_number() {
        let response = RemoteResponse::new(201).with_body(serde_json::json!({"id": "srv-1"}));
        assert_eq!(response.server_id().as_deref(), Some("srv-1"));

        let response = RemoteResponse::new(201).with_body(serde_json::json!({"id": 42}));
        assert_eq!(response.server_id().as_deref(), Some("42"));

        assert_eq!(RemoteResponse::new(204).server_id(), None);
        let response = RemoteResponse::new(201).with_body(serde_json::json!({"id": " "}));
        assert_eq!(response.server_id(), None);
    }

    #[test]
    fn parse_api_error_prefers_message() {
        assert_eq!(
            parse_api_error(422, r#"{"message": " bad amount ", "error": "invalid"}"#),
            "bad amount (422)"
        );
        assert_eq!(parse_api_error(400, r#"{"error": "invalid"}"#), "invalid (400)");
        assert_eq!(parse_api_error(502, "upstream down"), "upstream down (502)");
        assert_eq!(parse_api_error(500, "  "), "HTTP 500");
    }

    #[test]
    fn closures_are_token_sources() {
        let source = || Some("secret".to_string());
        assert_eq!(source.bearer_token().as_deref(), Some("secret"));
        assert_eq!(NoToken.bearer_token(), None);
    }
}
