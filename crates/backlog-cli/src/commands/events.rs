use backlog_core::models::EventKind;

use crate::commands::common::{format_event_line, print_json, Context};
use crate::error::CliError;

pub async fn run_events(
    context: &Context,
    limit: usize,
    kind: Option<EventKind>,
    as_json: bool,
) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let events = match kind {
        Some(kind) => {
            let mut events = engine.events().list_by_kind(kind).await?;
            events.reverse();
            events.truncate(limit);
            events
        }
        None => engine.events().recent(limit).await?,
    };

    if as_json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }
    for event in &events {
        println!("{}", format_event_line(event));
    }
    Ok(())
}
