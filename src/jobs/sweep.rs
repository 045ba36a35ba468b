//! Background job: purge expired image tokens and stale rate-limit windows.
//!
//! One periodic task replaces per-token timers, so memory stays bounded even
//! when issued tokens are never looked up again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::AppState;

/// Spawn the background sweep task. Call this once at startup.
pub fn spawn(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            run_once(&state);
        }
    })
}

/// One sweep pass. Returns the number of tokens removed.
pub fn run_once(state: &AppState) -> usize {
    let tokens = state.images.tokens.purge_expired();
    let windows =
        state.generation_limiter.evict_stale() + state.secure_image_limiter.evict_stale();

    if tokens > 0 || windows > 0 {
        tracing::info!(
            tokens,
            rate_windows = windows,
            live_tokens = state.images.tokens.len(),
            "sweep removed expired entries"
        );
    }
    tokens
}
