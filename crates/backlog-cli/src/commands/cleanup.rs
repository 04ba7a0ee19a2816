use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_cleanup(
    context: &Context,
    max_age_days: u32,
    events_days: Option<u32>,
) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let removed = engine.cleanup(max_age_days).await?;
    println!("Removed {removed} exhausted operation(s) older than {max_age_days} day(s)");

    if let Some(days) = events_days {
        let pruned = engine.prune_events(days).await?;
        println!("Pruned {pruned} audit event(s) older than {days} day(s)");
    }
    Ok(())
}
