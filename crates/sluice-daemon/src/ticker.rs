//! 1 Hz statistics ticker.
//!
//! Sleeps to absolute monotonic second deadlines (a relative sleep would
//! drift by the work done each tick), then advances the shaper's wall
//! clock by exactly one and flushes the recorder — all under the global
//! lock, once per second.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use quanta::Instant;

use crate::state::{lock, SharedState};

/// Advance the clock one second and flush statistics.
pub fn tick(shared: &SharedState) {
    let mut st = lock(shared);
    st.now += 1;
    let now = st.now;

    let crate::state::State {
        bucket,
        weights,
        recorder,
        ..
    } = &mut *st;
    recorder.flush(now, bucket, weights);
}

/// Worker loop; exits when `done` is raised.
pub fn run(shared: SharedState, done: Arc<AtomicBool>) {
    let mut deadline = Instant::now();
    while !done.load(Ordering::Relaxed) {
        deadline += Duration::from_secs(1);
        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
        tick(&shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use sluice_stats::cursor::StatStore;
    use sluice_stats::record::StatBucket;
    use sluice_stats::recorder::Recorder;

    // 2024-01-01 00:00:00 UTC
    const JAN1_2024: i64 = 1_704_067_200;

    #[test]
    fn tick_advances_clock_by_one() {
        let shared = State::new(1000, 1, 0, JAN1_2024, Recorder::disabled()).shared();
        tick(&shared);
        tick(&shared);
        assert_eq!(lock(&shared).now, JAN1_2024 + 2);
    }

    #[test]
    fn tick_flushes_bucket_to_day_file() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path().to_path_buf(), 365, vec![], false);
        let shared = State::new(1000, 1, 0, JAN1_2024, rec).shared();

        {
            let mut st = lock(&shared);
            st.charge_pass(500);
        }
        tick(&shared);

        let st = lock(&shared);
        assert!(st.bucket.is_zero(), "bucket drained by flush");
        drop(st);

        let store = StatStore::open(dir.path()).unwrap();
        let mut cur = store.cursor::<StatBucket>("dstat", JAN1_2024 + 1);
        let b = cur.read();
        assert_eq!(b.packets_pass, 1);
        assert_eq!(b.octets_pass, 500);
    }
}
