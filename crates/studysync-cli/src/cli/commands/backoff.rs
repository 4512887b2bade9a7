//! `studysync backoff` – show the retry delay schedule.

use anyhow::Result;
use studysync_core::config::SyncConfig;
use studysync_core::retry::compute_delay_with;

pub fn run_backoff(cfg: &SyncConfig, attempts: u32) -> Result<()> {
    let backoff = cfg.retry.backoff();
    println!(
        "{:<8} {:>10} {:>10} {:>10}",
        "ATTEMPT", "DELAY_MS", "MIN_MS", "MAX_MS"
    );
    for attempt in 0..attempts {
        println!(
            "{:<8} {:>10} {:>10} {:>10}",
            attempt + 1,
            backoff.capped_delay(attempt).as_millis(),
            compute_delay_with(attempt, &backoff, 0.0).as_millis(),
            compute_delay_with(attempt, &backoff, 1.0).as_millis(),
        );
    }
    println!("max retries: {}", cfg.retry.max_retries);
    Ok(())
}
