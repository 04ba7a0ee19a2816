use crate::commands::common::{format_optional_timestamp, print_json, Context};
use crate::error::CliError;

pub async fn run_status(context: &Context, as_json: bool) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let status = engine.get_status().await?;

    if as_json {
        return print_json(&status);
    }
    if !status.is_enabled {
        println!("Sync disabled: local store unavailable ({})", context.db_path.display());
        return Ok(());
    }

    let metadata = engine.get_metadata().await?;
    println!("Database:        {}", context.db_path.display());
    println!(
        "Remote:          {}",
        context.config.remote.base_url.as_deref().unwrap_or("not configured")
    );
    println!("Pending:         {}", status.pending_count);
    println!("Failed:          {}", metadata.error_count);
    println!("Open conflicts:  {}", metadata.conflict_count);
    println!("Last sync:       {}", format_optional_timestamp(status.last_sync));
    println!(
        "Last online:     {}",
        format_optional_timestamp(metadata.last_online_check)
    );
    println!(
        "Totals:          {} offline actions, {} successful syncs",
        metadata.total_offline_actions, metadata.successful_syncs
    );
    Ok(())
}
