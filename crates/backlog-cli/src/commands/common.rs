use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use backlog_core::models::{AuditEvent, ConflictResolution, OfflineRecord, PendingOperation};
use backlog_core::remote::{HttpRemote, RemoteAuthority, RemoteRequest, RemoteResponse};
use backlog_core::util::normalize_text_option;
use backlog_core::{DurableStore, EngineConfig, RemoteError, SyncEngine};
use chrono::Utc;
use serde::Serialize;

use crate::error::CliError;

const AUTH_TOKEN_VAR: &str = "BACKLOG_AUTH_TOKEN";

/// Where the engine lives and how it is configured
pub struct Context {
    pub db_path: PathBuf,
    pub config: EngineConfig,
}

impl Context {
    pub fn load(db_path: Option<PathBuf>, config_path: Option<&Path>) -> Result<Self, CliError> {
        Ok(Self {
            db_path: resolve_db_path(db_path),
            config: load_config(config_path)?,
        })
    }

    /// Engine for local commands; the remote is attached when configured
    pub async fn engine(&self) -> Result<SyncEngine, CliError> {
        let remote: Arc<dyn RemoteAuthority> = match self.config.remote.base_url {
            Some(_) => Arc::new(http_remote(&self.config)?),
            None => Arc::new(DetachedRemote),
        };
        self.open(remote).await
    }

    /// Engine that must be able to reach the remote
    pub async fn remote_engine(&self) -> Result<SyncEngine, CliError> {
        if self.config.remote.base_url.is_none() {
            return Err(CliError::RemoteNotConfigured);
        }
        let remote = Arc::new(http_remote(&self.config)?);
        self.open(remote).await
    }

    async fn open(&self, remote: Arc<dyn RemoteAuthority>) -> Result<SyncEngine, CliError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = DurableStore::open_or_disabled(&self.db_path).await;
        Ok(SyncEngine::new(store, remote, self.config.clone())?)
    }
}

fn http_remote(config: &EngineConfig) -> Result<HttpRemote, CliError> {
    let tokens = Arc::new(|| normalize_text_option(env::var(AUTH_TOKEN_VAR).ok()));
    Ok(HttpRemote::new(&config.remote, tokens)?)
}

/// Remote used when none is configured; every call fails as a network error
struct DetachedRemote;

#[async_trait]
impl RemoteAuthority for DetachedRemote {
    async fn send(&self, _request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        Err(RemoteError::Network("no remote configured".to_string()))
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        Err(RemoteError::Network("no remote configured".to_string()))
    }
}

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let config = match path {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.apply_env()?)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("BACKLOG_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backlog")
        .join("backlog.db")
}

/// Parse a JSON argument; a missing argument is an empty object
pub fn parse_payload(raw: Option<&str>) -> Result<serde_json::Value, CliError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(serde_json::json!({}));
    };
    serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_optional_timestamp(timestamp_ms: Option<i64>) -> String {
    timestamp_ms.map_or_else(|| "never".to_string(), format_timestamp)
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < 0 {
        let ahead = -diff;
        if ahead < minute {
            "in <1m".to_string()
        } else if ahead < hour {
            format!("in {}m", ahead / minute)
        } else if ahead < day {
            format!("in {}h", ahead / hour)
        } else {
            format!("in {}d", ahead / day)
        }
    } else if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn format_duration_ms(duration_ms: i64) -> String {
    let seconds = duration_ms / 1_000;
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3_600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3_600, (seconds % 3_600) / 60)
    }
}

pub fn format_operation_line(operation: &PendingOperation, now_ms: i64) -> String {
    let state = if operation.is_conflicted() {
        "conflict".to_string()
    } else if operation.is_exhausted() {
        "exhausted".to_string()
    } else if operation.next_retry_at > now_ms {
        format!("retry {}", format_relative_time(operation.next_retry_at, now_ms))
    } else {
        "ready".to_string()
    };
    format!(
        "{}  {:<6} {}:{}  p{}  {}/{}  {state}",
        operation.id,
        operation.action.as_str(),
        operation.entity_type,
        operation.entity_id,
        operation.priority.value(),
        operation.attempts,
        operation.max_attempts,
    )
}

pub fn format_record_line(record: &OfflineRecord, now_ms: i64) -> String {
    let mut line = format!(
        "{}:{}  {}  updated {}",
        record.entity_type,
        record.id,
        record.status,
        format_relative_time(record.updated_at, now_ms),
    );
    if let Some(error) = &record.last_error {
        line.push_str(&format!("  ({error})"));
    }
    line
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub conflict_id: String,
    pub operation_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
    pub resolution: String,
    pub created_at: i64,
    pub created_at_iso: String,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
}

pub fn conflict_to_item(conflict: &ConflictResolution) -> ConflictListItem {
    ConflictListItem {
        conflict_id: conflict.conflict_id.clone(),
        operation_id: conflict.operation_id.to_string(),
        action: conflict.action.to_string(),
        entity_type: conflict.entity_type.clone(),
        entity_id: conflict.entity_id.clone(),
        message: conflict.message.clone(),
        resolution: conflict.resolution.to_string(),
        created_at: conflict.created_at,
        created_at_iso: format_timestamp(conflict.created_at),
        resolved_at: conflict.resolved_at,
        resolved_by: conflict.resolved_by.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictResolution]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let state = match (&conflict.resolved_at, &conflict.resolved_by) {
                (Some(at), Some(by)) => {
                    format!("{} by {by} at {}", conflict.resolution, format_timestamp(*at))
                }
                (Some(at), None) => format!("{} at {}", conflict.resolution, format_timestamp(*at)),
                _ => "open".to_string(),
            };
            format!(
                "{}  {} {}:{}  {}  [{state}]",
                conflict.conflict_id,
                conflict.action,
                conflict.entity_type,
                conflict.entity_id,
                conflict.message,
            )
        })
        .collect()
}

pub fn format_event_line(event: &AuditEvent) -> String {
    let subject = match (&event.entity_type, &event.entity_id) {
        (Some(entity_type), Some(entity_id)) => format!("  {entity_type}:{entity_id}"),
        _ => String::new(),
    };
    let details = if event.details.is_null()
        || event.details.as_object().is_some_and(serde_json::Map::is_empty)
    {
        String::new()
    } else {
        format!("  {}", event.details)
    };
    format!(
        "{}  {}{subject}{details}",
        format_timestamp(event.timestamp),
        event.kind,
    )
}
