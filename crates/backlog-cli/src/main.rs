//! Backlog CLI - host application for the offline-first sync engine
//!
//! Queue changes while disconnected and replay them against the remote
//! authority when it is reachable.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, RecordCommands};
use crate::commands::cleanup::run_cleanup;
use crate::commands::common::Context;
use crate::commands::conflicts::run_conflicts;
use crate::commands::enqueue::run_enqueue;
use crate::commands::events::run_events;
use crate::commands::record::{
    run_record_delete, run_record_list, run_record_show, run_record_write,
};
use crate::commands::resolve::run_resolve;
use crate::commands::retry::run_retry;
use crate::commands::stats::run_stats;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;
use backlog_core::models::SyncAction;

const LOG_DIRECTIVE: &str = "backlog=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive: Directive = LOG_DIRECTIVE
        .parse()
        .map_err(|error| CliError::Config(format!("log filter: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context::load(cli.db_path, cli.config.as_deref())?;

    match cli.command {
        Commands::Enqueue {
            action,
            entity_type,
            entity_id,
            data,
            priority,
            max_attempts,
        } => {
            run_enqueue(
                &context,
                action.into(),
                &entity_type,
                &entity_id,
                data.as_deref(),
                priority.map(Into::into),
                max_attempts,
            )
            .await?;
        }
        Commands::Record { command } => match command {
            RecordCommands::Create {
                entity_type,
                entity_id,
                data,
            } => {
                run_record_write(&context, SyncAction::Create, &entity_type, &entity_id, &data)
                    .await?;
            }
            RecordCommands::Update {
                entity_type,
                entity_id,
                data,
            } => {
                run_record_write(&context, SyncAction::Update, &entity_type, &entity_id, &data)
                    .await?;
            }
            RecordCommands::Delete {
                entity_type,
                entity_id,
            } => run_record_delete(&context, &entity_type, &entity_id).await?,
            RecordCommands::Show {
                entity_type,
                entity_id,
                json,
            } => run_record_show(&context, &entity_type, &entity_id, json).await?,
            RecordCommands::List { entity_type, json } => {
                run_record_list(&context, &entity_type, json).await?;
            }
        },
        Commands::Sync { force, json } => run_sync(&context, force, json).await?,
        Commands::Status { json } => run_status(&context, json).await?,
        Commands::Stats { json } => run_stats(&context, json).await?,
        Commands::Cleanup {
            max_age_days,
            events_days,
        } => run_cleanup(&context, max_age_days, events_days).await?,
        Commands::Conflicts { all, json } => run_conflicts(&context, all, json).await?,
        Commands::Resolve {
            conflict_id,
            strategy,
            data,
        } => run_resolve(&context, &conflict_id, strategy, data.as_deref()).await?,
        Commands::Retry => run_retry(&context).await?,
        Commands::Events { limit, kind, json } => {
            run_events(&context, limit, kind.map(Into::into), json).await?;
        }
        Commands::Watch => run_watch(&context).await?,
    }

    Ok(())
}
