use std::path::PathBuf;

use backlog_core::models::{EventKind, Priority, SyncAction};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "backlog")]
#[command(about = "Queue changes offline and replay them when the remote is reachable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional JSON engine configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a raw operation
    Enqueue {
        #[arg(value_enum)]
        action: ActionArg,
        entity_type: String,
        entity_id: String,
        /// JSON payload (defaults to `{}`)
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
        /// Override the action's default priority
        #[arg(long, value_enum)]
        priority: Option<PriorityArg>,
        /// Override the retry budget
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
    },
    /// Work with local records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Replay queued operations against the remote
    Sync {
        /// Run even when the remote looks unreachable
        #[arg(long)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove exhausted operations and expired cache entries
    Cleanup {
        /// Only remove items created more than this many days ago
        #[arg(long, default_value = "7")]
        max_age_days: u32,
        /// Also prune audit events older than this many days
        #[arg(long, value_name = "DAYS")]
        events_days: Option<u32>,
    },
    /// List sync conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve an open conflict
    Resolve {
        conflict_id: String,
        #[arg(long, value_enum)]
        strategy: ResolveStrategy,
        /// Merged JSON payload, required with `--strategy merge`
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
    /// Give exhausted operations a fresh retry budget
    Retry,
    /// Show the audit log
    Events {
        /// Number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only show one kind of event
        #[arg(long, value_enum)]
        kind: Option<EventKindArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Monitor connectivity and sync automatically until interrupted
    Watch,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Create a record and queue its creation
    Create {
        entity_type: String,
        entity_id: String,
        /// JSON data
        data: String,
    },
    /// Replace a record's data and queue the update
    Update {
        entity_type: String,
        entity_id: String,
        /// JSON data
        data: String,
    },
    /// Delete a record and queue the remote delete
    Delete { entity_type: String, entity_id: String },
    /// Show one record
    Show {
        entity_type: String,
        entity_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records of one type
    List {
        entity_type: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ActionArg {
    Create,
    Update,
    Delete,
}

impl From<ActionArg> for SyncAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Create => Self::Create,
            ActionArg::Update => Self::Update,
            ActionArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    Critical,
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(priority: PriorityArg) -> Self {
        match priority {
            PriorityArg::Critical => Self::Critical,
            PriorityArg::High => Self::High,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::Low => Self::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolveStrategy {
    /// Re-send the local data
    Local,
    /// Keep the server's data and drop the queued change
    Server,
    /// Send a merged payload
    Merge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EventKindArg {
    Enqueued,
    SyncStarted,
    SyncCompleted,
    SyncFailed,
    OperationSynced,
    OperationFailed,
    ConflictDetected,
    ConflictResolved,
    Cleanup,
    ConnectivityChanged,
}

impl From<EventKindArg> for EventKind {
    fn from(kind: EventKindArg) -> Self {
        match kind {
            EventKindArg::Enqueued => Self::Enqueued,
            EventKindArg::SyncStarted => Self::SyncStarted,
            EventKindArg::SyncCompleted => Self::SyncCompleted,
            EventKindArg::SyncFailed => Self::SyncFailed,
            EventKindArg::OperationSynced => Self::OperationSynced,
            EventKindArg::OperationFailed => Self::OperationFailed,
            EventKindArg::ConflictDetected => Self::ConflictDetected,
            EventKindArg::ConflictResolved => Self::ConflictResolved,
            EventKindArg::Cleanup => Self::Cleanup,
            EventKindArg::ConnectivityChanged => Self::ConnectivityChanged,
        }
    }
}
