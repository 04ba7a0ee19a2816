use backlog_core::models::{EnqueueOptions, Priority, SyncAction};

use crate::commands::common::{parse_payload, Context};
use crate::error::CliError;

pub async fn run_enqueue(
    context: &Context,
    action: SyncAction,
    entity_type: &str,
    entity_id: &str,
    data: Option<&str>,
    priority: Option<Priority>,
    max_attempts: Option<u32>,
) -> Result<(), CliError> {
    let payload = if action == SyncAction::Delete && data.is_none() {
        serde_json::Value::Null
    } else {
        parse_payload(data)?
    };
    let mut options = EnqueueOptions::default();
    if let Some(priority) = priority {
        options = options.with_priority(priority);
    }
    if let Some(max_attempts) = max_attempts {
        options = options.with_max_attempts(max_attempts);
    }

    let engine = context.engine().await?;
    let operation = engine
        .enqueue(action, entity_type, entity_id, payload, options)
        .await?;
    println!(
        "Queued {} {}:{} ({})",
        operation.action, operation.entity_type, operation.entity_id, operation.id
    );
    Ok(())
}
