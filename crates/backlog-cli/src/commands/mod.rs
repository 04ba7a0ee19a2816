pub mod cleanup;
pub mod common;
pub mod conflicts;
pub mod enqueue;
pub mod events;
pub mod record;
pub mod resolve;
pub mod retry;
pub mod stats;
pub mod status;
pub mod sync;
pub mod watch;
