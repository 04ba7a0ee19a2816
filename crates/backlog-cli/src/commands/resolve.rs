use backlog_core::models::ConflictDecision;

use crate::cli::ResolveStrategy;
use crate::commands::common::{parse_payload, Context};
use crate::error::CliError;

const RESOLVED_BY: &str = "cli";

pub fn decision_for(
    strategy: ResolveStrategy,
    data: Option<&str>,
) -> Result<ConflictDecision, CliError> {
    match strategy {
        ResolveStrategy::Local => Ok(ConflictDecision::KeepLocal),
        ResolveStrategy::Server => Ok(ConflictDecision::AcceptServer),
        ResolveStrategy::Merge => {
            let data = data.ok_or(CliError::MissingMergeData)?;
            Ok(ConflictDecision::Merge(parse_payload(Some(data))?))
        }
    }
}

pub async fn run_resolve(
    context: &Context,
    conflict_id: &str,
    strategy: ResolveStrategy,
    data: Option<&str>,
) -> Result<(), CliError> {
    let decision = decision_for(strategy, data)?;
    let engine = context.engine().await?;
    let resolved = engine
        .resolve_conflict(conflict_id.trim(), decision, RESOLVED_BY)
        .await?;
    println!(
        "Resolved conflict {} on {}:{} ({})",
        resolved.conflict_id, resolved.entity_type, resolved.entity_id, resolved.resolution
    );
    Ok(())
}
