//! # sluice-engine
//!
//! Pure logic for the sluice traffic shaper — no sockets, no files, no
//! threads. The daemon owns all I/O and drives these state machines.
//!
//! A packet diverted from the kernel is scored by a chain of pluggable
//! modules ([`score`]), admitted into a fixed-capacity priority buffer
//! ([`shaper`]) where low-priority packets lose their slot to higher-
//! priority arrivals, and released at a byte-rate budget computed by
//! [`pacing`].
//!
//! ## Crate structure
//!
//! - [`ipv4`] — bounds-checked IPv4 header view used by the scorers
//! - [`score`] — scoring module contract, chain runner, built-in modules
//! - [`shaper`] — priority-indexed slot buffer (admission + release)
//! - [`pacing`] — post-emission sleep math for the release loop

pub mod ipv4;
pub mod pacing;
pub mod score;
pub mod shaper;
