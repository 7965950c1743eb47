//! # sluice-daemon
//!
//! The running shaper: binds an NFQUEUE, scores each diverted packet
//! through the engine's module chain, buffers it by priority, and
//! releases at the configured byte rate while a 1 Hz ticker persists
//! statistics.
//!
//! Thread layout (plus the main ingress loop blocking on the queue):
//!
//! - *release* — picks the highest-priority slot, issues `ACCEPT`,
//!   sleeps the packet's wire time
//! - *ticker* — absolute-deadline 1 Hz clock, advances the shaper's
//!   timestamp and flushes the statistics recorder
//!
//! One global mutex ([`state::State`]) covers the limit, the buffer, the
//! current-second counters and the open day files. The scoring chain
//! itself runs outside the lock.

pub mod config;
pub mod ingress;
pub mod nfq;
pub mod release;
pub mod state;
pub mod ticker;
pub mod verdict;
