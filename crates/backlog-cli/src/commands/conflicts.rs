use backlog_core::models::ConflictResolution;

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, print_json, ConflictListItem, Context,
};
use crate::error::CliError;

pub async fn run_conflicts(context: &Context, all: bool, as_json: bool) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let conflicts: Vec<ConflictResolution> = if all {
        engine.conflicts().list_all().await?
    } else {
        engine.list_conflicts().await?
    };

    if as_json {
        let items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictListItem>>();
        return print_json(&items);
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
