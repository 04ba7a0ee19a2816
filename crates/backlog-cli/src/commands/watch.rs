use backlog_core::sync::EngineEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{format_optional_timestamp, Context};
use crate::error::CliError;

pub async fn run_watch(context: &Context) -> Result<(), CliError> {
    let engine = context.remote_engine().await?;
    let mut events = engine.subscribe();

    let initial = engine.monitor().probe_now().await;
    println!(
        "Watching {} ({}); Ctrl-C to stop",
        context.config.remote.base_url.as_deref().unwrap_or_default(),
        if initial.is_online { "online" } else { "offline" }
    );

    let monitor = engine.monitor().spawn();
    let auto_sync = engine.start_auto_sync();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::ConnectivityChanged { state }) => {
                    println!(
                        "Connectivity: {} ({})",
                        if state.is_online { "online" } else { "offline" },
                        state.quality
                    );
                }
                Ok(EngineEvent::MetadataChanged { metadata }) => {
                    println!(
                        "Pending {}, failed {}, conflicts {}, last sync {}",
                        metadata.pending_count,
                        metadata.error_count,
                        metadata.conflict_count,
                        format_optional_timestamp(metadata.last_sync)
                    );
                }
                Ok(EngineEvent::QueueChanged | EngineEvent::RecordChanged { .. }) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Watch output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("Stopping...");
    auto_sync.shutdown().await;
    monitor.shutdown().await;
    Ok(())
}
