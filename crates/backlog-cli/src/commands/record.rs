use backlog_core::models::{EnqueueOptions, SyncAction};

use crate::commands::common::{format_record_line, now_ms, parse_payload, print_json, Context};
use crate::error::CliError;

pub async fn run_record_write(
    context: &Context,
    action: SyncAction,
    entity_type: &str,
    entity_id: &str,
    data: &str,
) -> Result<(), CliError> {
    let payload = parse_payload(Some(data))?;
    let engine = context.engine().await?;
    let operation = engine
        .enqueue(action, entity_type, entity_id, payload, EnqueueOptions::default())
        .await?;
    println!(
        "Saved {}:{} and queued {}",
        operation.entity_type, operation.entity_id, operation.action
    );
    Ok(())
}

pub async fn run_record_delete(
    context: &Context,
    entity_type: &str,
    entity_id: &str,
) -> Result<(), CliError> {
    let engine = context.engine().await?;
    match engine
        .delete_record(entity_type, entity_id, EnqueueOptions::default())
        .await?
    {
        Some(operation) => println!(
            "Deleted {entity_type}:{entity_id} and queued remote delete ({})",
            operation.id
        ),
        None => println!("Deleted {entity_type}:{entity_id} (never synced, nothing to send)"),
    }
    Ok(())
}

pub async fn run_record_show(
    context: &Context,
    entity_type: &str,
    entity_id: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let record = engine
        .records()
        .get(entity_type, entity_id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(format!("{entity_type}:{entity_id}")))?;

    if as_json {
        return print_json(&record);
    }
    println!("{}", format_record_line(&record, now_ms()));
    println!("{}", serde_json::to_string_pretty(&record.data)?);
    Ok(())
}

pub async fn run_record_list(
    context: &Context,
    entity_type: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let records = engine.records().list(entity_type).await?;

    if as_json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No {entity_type} records.");
        return Ok(());
    }
    let now = now_ms();
    for record in &records {
        println!("{}", format_record_line(record, now));
    }
    Ok(())
}
