use crate::commands::common::{
    format_duration_ms, format_operation_line, format_optional_timestamp, now_ms, print_json,
    Context,
};
use crate::error::CliError;

pub async fn run_stats(context: &Context, as_json: bool) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let stats = engine.get_stats().await?;

    if as_json {
        return print_json(&stats);
    }

    println!("Total:           {}", stats.total_items);
    println!("Pending:         {}", stats.pending_items);
    println!("Failed:          {}", stats.failed_items);
    println!("Conflicted:      {}", stats.conflicted_items);
    println!("Average wait:    {}", format_duration_ms(stats.average_wait_ms));
    println!("Oldest:          {}", format_optional_timestamp(stats.oldest_item));
    println!("Newest:          {}", format_optional_timestamp(stats.newest_item));

    let operations = engine.queue().list().await?;
    if !operations.is_empty() {
        println!();
        let now = now_ms();
        for operation in &operations {
            println!("{}", format_operation_line(operation, now));
        }
    }
    Ok(())
}
