use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] backlog_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("`--strategy merge` needs `--data`")]
    MissingMergeData,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "No remote configured. Set BACKLOG_REMOTE_URL or `remote.base_url` in the config file to enable `backlog sync`."
    )]
    RemoteNotConfigured,
}
