//! Outcome classification for remote calls

use serde::{Deserialize, Serialize};

use crate::config::ClientErrorPolicy;
use crate::error::RemoteError;
use crate::models::SyncAction;
use crate::remote::RemoteResponse;

/// Why an item did not sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, refused connection, unreadable response
    Network,
    /// 5xx
    ServerError,
    /// 4xx other than conflict, retried
    RemoteRejected,
    Conflict,
    /// 4xx under the terminal client-error policy
    Terminal,
    /// Retry budget spent
    Exhausted,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ServerError => "server_error",
            Self::RemoteRejected => "remote_rejected",
            Self::Conflict => "conflict",
            Self::Terminal => "terminal",
            Self::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Success {
        server_id: Option<String>,
        server_data: Option<serde_json::Value>,
    },
    Conflict {
        server_data: Option<serde_json::Value>,
        message: String,
    },
    Retryable {
        kind: FailureKind,
        error: String,
    },
    Terminal {
        kind: FailureKind,
        error: String,
    },
    /// Cancelled before an answer arrived; the item is left untouched
    Aborted,
}

const CONFLICT: u16 = 409;
const NOT_FOUND: u16 = 404;
const REQUEST_TIMEOUT: u16 = 408;
const TOO_MANY_REQUESTS: u16 = 429;

/// Map a transport result onto a queue decision
pub fn classify(
    action: SyncAction,
    outcome: &Result<RemoteResponse, RemoteError>,
    policy: ClientErrorPolicy,
) -> Classification {
    let response = match outcome {
        Ok(response) => response,
        Err(RemoteError::Aborted) => return Classification::Aborted,
        Err(error) => {
            return Classification::Retryable {
                kind: FailureKind::Network,
                error: error.to_string(),
            }
        }
    };

    match response.status {
        _ if response.is_success() => Classification::Success {
            server_id: response.server_id(),
            server_data: response.body.clone(),
        },
        NOT_FOUND if action == SyncAction::Delete => Classification::Success {
            server_id: None,
            server_data: None,
        },
        CONFLICT => Classification::Conflict {
            server_data: response.body.clone(),
            message: response.describe(),
        },
        REQUEST_TIMEOUT | TOO_MANY_REQUESTS => Classification::Retryable {
            kind: FailureKind::RemoteRejected,
            error: response.describe(),
        },
        400..=499 => match policy {
            ClientErrorPolicy::Retry => Classification::Retryable {
                kind: FailureKind::RemoteRejected,
                error: response.describe(),
            },
            ClientErrorPolicy::Terminal => Classification::Terminal {
                kind: FailureKind::Terminal,
                error: response.describe(),
            },
        },
        500..=599 => Classification::Retryable {
            kind: FailureKind::ServerError,
            error: response.describe(),
        },
        _ => Classification::Retryable {
            kind: FailureKind::Network,
            error: format!("unexpected status {}", response.status),
        },
    }
}
