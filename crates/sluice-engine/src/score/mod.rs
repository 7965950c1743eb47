//! # Scoring module framework
//!
//! Each packet's priority is the sum of weights produced by a chain of
//! pluggable scorers. A module owns opaque state, receives key/value
//! configuration directives, confirms readiness once configuration is
//! done, and then scores packets one at a time.
//!
//! Modules are represented as a list of boxed trait objects — new ones
//! register by appending a constructor to [`registry`]. Chain order is
//! evaluation order and also fixes the per-module statistics layout.
//!
//! ## Weight combination
//!
//! The combined weight starts at a small positive ε so a packet scored by
//! an empty chain still outranks the buffer's empty-slot sentinel. Each
//! enabled module contributes `k · weight` where `k` is its configured
//! multiplier. A module returning a **negative** weight short-circuits
//! the chain: the packet is dropped unconditionally and the multiplier is
//! not applied to the negative value.

mod big_flows;
mod bymark;
mod entropy;
mod random;

pub use big_flows::BigFlows;
pub use bymark::ByMark;
pub use entropy::Entropy;
pub use random::Random;

use crate::ipv4::Ipv4Heads;
use tracing::warn;

/// A packet as presented to the scorers: raw bytes, the kernel mark, and
/// the already-parsed IPv4 header view.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    pub data: &'a [u8],
    pub mark: u32,
    pub ip: Ipv4Heads,
}

/// Contract every scoring module obeys.
///
/// `weight` is called from the single ingress path only and must never
/// block on I/O; the global shaper lock is *not* held around it.
pub trait ScoreModule: Send {
    /// Stable name — used for config directives and the on-disk
    /// per-module weight series.
    fn name(&self) -> &'static str;

    /// Consume one configuration directive addressed to this module.
    /// Unknown keys are reported and ignored.
    fn configure(&mut self, key: &str, value: &str);

    /// Configuration is complete. Returns `false` to disable the module
    /// for the rest of the run (its `weight` is never called).
    fn finish(&mut self) -> bool {
        true
    }

    /// Score one packet.
    fn weight(&mut self, pkt: &PacketView<'_>) -> f64;
}

/// One chain position: the module plus its multiplier and enabled flag.
pub struct ChainEntry {
    pub module: Box<dyn ScoreModule>,
    pub k: f64,
    pub enabled: bool,
}

/// Result of running the chain on one packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainVerdict {
    /// Combined weight plus the per-module `k·w` contributions
    /// (chain-index, value) for the weight-chart accumulators.
    Weight {
        total: f64,
        contributions: Vec<(usize, f64)>,
    },
    /// A module demanded an unconditional drop. Modules scored before
    /// the short-circuit still report their contributions.
    Reject {
        weight: f64,
        contributions: Vec<(usize, f64)>,
    },
}

/// The ordered scoring chain.
pub struct ScoreChain {
    entries: Vec<ChainEntry>,
}

/// The built-in module list. Order is significant.
pub fn registry() -> Vec<Box<dyn ScoreModule>> {
    vec![
        Box::new(BigFlows::new()),
        Box::new(Entropy::new()),
        Box::new(ByMark::new()),
        Box::new(Random::new()),
    ]
}

impl ScoreChain {
    /// Chain over the built-in registry.
    pub fn standard() -> Self {
        Self::from_modules(registry())
    }

    /// Chain over an explicit module list (tests register doubles here).
    pub fn from_modules(modules: Vec<Box<dyn ScoreModule>>) -> Self {
        ScoreChain {
            entries: modules
                .into_iter()
                .map(|module| ChainEntry {
                    module,
                    k: 1.0,
                    enabled: false,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Module names in chain order (enabled or not — the weight series
    /// files exist for every registered module).
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.module.name()).collect()
    }

    /// Offer a configuration directive to the module called `name`.
    ///
    /// `<name> k <float>` sets the multiplier; anything else is forwarded
    /// to the module's `configure`. Returns `false` when no module claims
    /// the name (the caller ignores such directives silently).
    pub fn configure(&mut self, name: &str, p1: &str, p2: &str) -> bool {
        for entry in &mut self.entries {
            if entry.module.name() == name {
                if p1 == "k" {
                    match p2.parse::<f64>() {
                        Ok(k) => entry.k = k,
                        Err(_) => warn!(
                            module = name,
                            value = p2,
                            "ignoring unparseable multiplier"
                        ),
                    }
                } else {
                    entry.module.configure(p1, p2);
                }
                return true;
            }
        }
        false
    }

    /// Configuration is done: let every module finish, disabling the ones
    /// that decline.
    pub fn finalize(&mut self) {
        for entry in &mut self.entries {
            entry.enabled = entry.module.finish();
            if !entry.enabled {
                warn!(module = entry.module.name(), "module disabled");
            }
        }
    }

    /// Run the chain on one packet.
    pub fn score(&mut self, pkt: &PacketView<'_>) -> ChainVerdict {
        let mut total = f64::EPSILON;
        let mut contributions = Vec::with_capacity(self.entries.len());

        for (i, entry) in self.entries.iter_mut().enumerate() {
            if !entry.enabled {
                continue;
            }
            let w = entry.module.weight(pkt);
            if w < 0.0 {
                return ChainVerdict::Reject {
                    weight: w,
                    contributions,
                };
            }
            let kw = w * entry.k;
            contributions.push((i, kw));
            total += kw;
        }

        ChainVerdict::Weight {
            total,
            contributions,
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::ipv4;

    /// Fixed-weight module for chain tests.
    pub struct Fixed {
        pub w: f64,
    }

    impl ScoreModule for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn configure(&mut self, _key: &str, _value: &str) {}
        fn weight(&mut self, _pkt: &PacketView<'_>) -> f64 {
            self.w
        }
    }

    /// Build a `PacketView` over a UDP test packet. Returns the backing
    /// buffer and a closure-friendly parse helper.
    pub fn udp_packet(saddr: [u8; 4], daddr: [u8; 4], payload: &[u8]) -> Vec<u8> {
        ipv4::testutil::packet(saddr, daddr, ipv4::PROTO_UDP, 1000, 2000, payload)
    }

    pub fn view(data: &[u8], mark: u32) -> PacketView<'_> {
        PacketView {
            data,
            mark,
            ip: ipv4::parse(data).expect("test packet parses"),
        }
    }
}
