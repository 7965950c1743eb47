//! Per-flow Shannon entropy scorer.
//!
//! Keeps a 256-bin byte histogram per 5-tuple flow in a circular buffer
//! of N slots and scores each packet with the entropy (in bits) of its
//! flow's payload stream so far, floored at ε. Low-entropy streams (bulk
//! repetitive transfers) score low; interactive or compressed traffic
//! scores high.
//!
//! The transport payload offset comes from the parsed IPv4 header; TCP
//! is assumed to carry a fixed 20-byte header (see [`crate::ipv4`]).

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::{PacketView, ScoreModule};

#[derive(Debug, Clone)]
struct EntFlow {
    saddr: Ipv4Addr,
    daddr: Ipv4Addr,
    proto: u8,
    sport: u16,
    dport: u16,
    stream_len: u64,
    histogram: Box<[u64; 256]>,
}

impl Default for EntFlow {
    fn default() -> Self {
        EntFlow {
            saddr: Ipv4Addr::UNSPECIFIED,
            daddr: Ipv4Addr::UNSPECIFIED,
            proto: 0,
            sport: 0,
            dport: 0,
            stream_len: 0,
            histogram: Box::new([0u64; 256]),
        }
    }
}

impl EntFlow {
    fn matches(&self, pkt: &PacketView<'_>) -> bool {
        self.saddr == pkt.ip.saddr
            && self.daddr == pkt.ip.daddr
            && self.proto == pkt.ip.proto
            && self.sport == pkt.ip.sport
            && self.dport == pkt.ip.dport
    }

    /// Shannon entropy of the stream in bits, floored at ε.
    fn entropy_bits(&self) -> f64 {
        let mut m = f64::EPSILON;
        if self.stream_len == 0 {
            return m;
        }
        for &count in self.histogram.iter() {
            if count == 0 {
                continue;
            }
            let freq = count as f64 / self.stream_len as f64;
            m -= freq * freq.log2();
        }
        m
    }
}

#[derive(Debug, Default)]
struct EntTable {
    flows: Vec<EntFlow>,
    cursor: usize,
}

impl EntTable {
    /// Fold one packet's payload into its flow and return the flow index.
    fn account(&mut self, pkt: &PacketView<'_>) -> usize {
        let idx = match self.flows.iter().position(|f| f.matches(pkt)) {
            Some(i) => i,
            None => {
                let i = self.cursor;
                let flow = &mut self.flows[i];
                flow.saddr = pkt.ip.saddr;
                flow.daddr = pkt.ip.daddr;
                flow.proto = pkt.ip.proto;
                flow.sport = pkt.ip.sport;
                flow.dport = pkt.ip.dport;
                flow.stream_len = 0;
                flow.histogram.fill(0);
                self.cursor = (self.cursor + 1) % self.flows.len();
                i
            }
        };

        let payload = &pkt.data[pkt.ip.payload_off..];
        let flow = &mut self.flows[idx];
        flow.stream_len += payload.len() as u64;
        for &b in payload {
            flow.histogram[b as usize] += 1;
        }
        idx
    }
}

/// The `entropy` module.
pub struct Entropy {
    nrecent: i64,
    debug_period: i64,
    table: Arc<Mutex<EntTable>>,
}

impl Entropy {
    pub fn new() -> Self {
        Entropy {
            nrecent: 0,
            debug_period: 0,
            table: Arc::new(Mutex::new(EntTable::default())),
        }
    }
}

impl Default for Entropy {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreModule for Entropy {
    fn name(&self) -> &'static str {
        "entropy"
    }

    fn configure(&mut self, key: &str, value: &str) {
        match key {
            "nrecent" => self.nrecent = value.parse().unwrap_or(0),
            "debug" => {
                self.debug_period = value.parse().unwrap_or(0);
                if self.debug_period <= 0 {
                    warn!(module = self.name(), value, "strange debug value");
                    self.debug_period = 0;
                }
            }
            _ => warn!(module = self.name(), key, "unknown config parameter"),
        }
    }

    fn finish(&mut self) -> bool {
        if self.nrecent < 1 {
            warn!(
                module = self.name(),
                nrecent = self.nrecent,
                "incorrect number of recent flows"
            );
            return false;
        }

        {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.flows = vec![EntFlow::default(); self.nrecent as usize];
            table.cursor = 0;
        }

        if self.debug_period > 0 {
            spawn_dump_thread(self.table.clone(), self.debug_period as u64);
        }
        true
    }

    fn weight(&mut self, pkt: &PacketView<'_>) -> f64 {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let idx = table.account(pkt);
        table.flows[idx].entropy_bits()
    }
}

fn spawn_dump_thread(table: Arc<Mutex<EntTable>>, period_secs: u64) {
    let spawned = thread::Builder::new()
        .name("entropy-dump".into())
        .spawn(move || loop {
            thread::sleep(Duration::from_secs(period_secs));
            let table = table.lock().unwrap_or_else(|e| e.into_inner());
            for (i, f) in table.flows.iter().enumerate() {
                info!(
                    slot = i,
                    proto = f.proto,
                    src = %f.saddr,
                    sport = f.sport,
                    dst = %f.daddr,
                    dport = f.dport,
                    entropy = f.entropy_bits(),
                    "entropy flow"
                );
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn entropy dump thread");
    }
}
