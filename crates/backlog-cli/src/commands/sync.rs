use backlog_core::SyncOptions;

use crate::commands::common::{format_duration_ms, print_json, Context};
use crate::error::CliError;

pub async fn run_sync(context: &Context, force: bool, as_json: bool) -> Result<(), CliError> {
    let engine = context.remote_engine().await?;
    if !force {
        let state = engine.monitor().probe_now().await;
        if !state.is_online {
            println!("Remote unreachable; use --force to try anyway");
            return Ok(());
        }
    }

    let result = engine.sync(SyncOptions { force }).await?;
    if as_json {
        return print_json(&result);
    }

    let duration_ms = i64::try_from(result.duration.as_millis()).unwrap_or(i64::MAX);
    println!(
        "Sync finished in {}: {} synced, {} failed, {} conflicts",
        format_duration_ms(duration_ms),
        result.synced_count,
        result.error_count,
        result.conflicts.len()
    );
    for error in &result.errors {
        println!(
            "  {} {}:{}  {} (attempt {}): {}",
            error.action,
            error.entity_type,
            error.entity_id,
            error.kind,
            error.attempts,
            error.message
        );
    }
    for conflict in &result.conflicts {
        println!(
            "  conflict {} on {}:{}: {}",
            conflict.conflict_id, conflict.entity_type, conflict.entity_id, conflict.message
        );
    }
    Ok(())
}
