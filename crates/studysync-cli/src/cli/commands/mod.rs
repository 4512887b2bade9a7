//! CLI command handlers, one per file.

mod backoff;
mod config;
mod probe;
mod simulate;

pub use backoff::run_backoff;
pub use config::run_config;
pub use probe::run_probe;
pub use simulate::run_simulate;
