//! Release worker — the rate-limited emitter.
//!
//! Picks the highest-priority slot under the lock, issues `ACCEPT`,
//! charges the pass counters, then sleeps the packet's wire time at the
//! configured byte rate *outside* the lock. With nothing buffered it
//! sleeps the time 100 bytes would take, so an idle loop still polls at
//! a rate proportional to the limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use sluice_engine::pacing;

use crate::state::{lock, SharedState};
use crate::verdict::VerdictSink;

/// One release step: emit at most one packet, return the pacing sleep.
pub fn release_one(shared: &SharedState, verdicts: &dyn VerdictSink) -> Duration {
    let mut st = lock(shared);
    let rate = pacing::effective_rate(st.limit);

    match st.shaper.release_max() {
        Some(out) => {
            if let Err(e) = verdicts.accept(out.id, &out.payload) {
                warn!(id = out.id, error = %e, "accept verdict failed");
            }
            st.charge_pass(out.payload.len());
            pacing::send_delay(out.payload.len() as u64, rate)
        }
        None => pacing::idle_delay(rate),
    }
}

/// Worker loop; exits when `done` is raised.
pub fn run(shared: SharedState, verdicts: Arc<dyn VerdictSink>, done: Arc<AtomicBool>) {
    while !done.load(Ordering::Relaxed) {
        let delay = release_one(&shared, verdicts.as_ref());
        thread::sleep(delay);
    }
}
