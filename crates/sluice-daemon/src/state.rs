//! Shared daemon state.
//!
//! One mutex covers everything the three workers touch together: the
//! release budget, the shaping buffer, the current-second statistics,
//! the per-module weight accumulators, the shaper's wall-clock counter
//! and the recorder with its open day files. Contention is negligible —
//! the ticker takes the lock once a second, and the scoring chain runs
//! outside it.

use std::sync::{Arc, Mutex, MutexGuard};

use sluice_engine::shaper::Shaper;
use sluice_stats::record::{StatBucket, WeightAccum};
use sluice_stats::recorder::Recorder;

pub struct State {
    /// Release budget, bytes/sec. 0 and `u64::MAX` are the reserved
    /// block-all / no-shaping values.
    pub limit: u64,
    /// Wall-clock counter, advanced only by the ticker.
    pub now: i64,
    pub shaper: Shaper,
    /// Current-second traffic counters.
    pub bucket: StatBucket,
    /// Current-second weight accumulators, one per chain entry.
    pub weights: Vec<WeightAccum>,
    pub recorder: Recorder,
}

pub type SharedState = Arc<Mutex<State>>;

impl State {
    pub fn new(limit: u64, capacity: usize, modules: usize, now: i64, recorder: Recorder) -> Self {
        State {
            limit,
            now,
            shaper: Shaper::new(capacity),
            bucket: StatBucket::default(),
            weights: vec![WeightAccum::default(); modules],
            recorder,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Charge one passed packet, when statistics are on.
    pub fn charge_pass(&mut self, octets: usize) {
        if self.recorder.stat_enabled() {
            self.bucket.add_pass(octets as u32);
        }
    }

    /// Charge one dropped packet, when statistics are on.
    pub fn charge_drop(&mut self, octets: usize) {
        if self.recorder.stat_enabled() {
            self.bucket.add_drop(octets as u32);
        }
    }
}

/// Take the global lock, recovering from a poisoned mutex.
pub fn lock(shared: &SharedState) -> MutexGuard<'_, State> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}
