use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_retry(context: &Context) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let reset = engine.retry_failed().await?;
    if reset == 0 {
        println!("No failed operations.");
    } else {
        println!("Reset {reset} failed operation(s); they run on the next sync");
    }
    Ok(())
}
