//! # sluice-charts
//!
//! Read-only HTTP companion to the shaper: renders PNG time-series from
//! the statistics day files. Runs as a separate process; the only
//! contract with the daemon is the on-disk record format, which readers
//! treat as sparse (missing seconds are zero).

pub mod render;
pub mod service;
