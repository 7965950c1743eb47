//! Big-flow inhibitor.
//!
//! Tracks byte totals for the N most recently seen `(src, dst)` address
//! pairs in a circular buffer and scores each packet by
//! `total_octets / flow_octets`: the smaller a flow's share of the
//! tracked traffic, the higher its multiplier, so whales sink toward the
//! bottom of the shaping buffer.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::{PacketView, ScoreModule};

#[derive(Debug, Clone, Copy)]
struct Flow {
    saddr: Ipv4Addr,
    daddr: Ipv4Addr,
    octets: u64,
}

impl Default for Flow {
    fn default() -> Self {
        Flow {
            saddr: Ipv4Addr::UNSPECIFIED,
            daddr: Ipv4Addr::UNSPECIFIED,
            octets: 0,
        }
    }
}

#[derive(Debug, Default)]
struct FlowTable {
    flows: Vec<Flow>,
    cursor: usize,
    /// Sum of `octets` across all slots. When a slot is overwritten its
    /// previous contribution is subtracted before the newcomer's bytes
    /// are added.
    total_octets: u64,
}

impl FlowTable {
    /// Account one packet and return `(flow_octets, total_octets)` after
    /// the update.
    fn account(&mut self, saddr: Ipv4Addr, daddr: Ipv4Addr, octets: u64) -> (u64, u64) {
        let idx = match self
            .flows
            .iter()
            .position(|f| f.saddr == saddr && f.daddr == daddr)
        {
            Some(i) => {
                self.flows[i].octets += octets;
                i
            }
            None => {
                let i = self.cursor;
                self.total_octets -= self.flows[i].octets;
                self.flows[i] = Flow {
                    saddr,
                    daddr,
                    octets,
                };
                self.cursor = (self.cursor + 1) % self.flows.len();
                i
            }
        };
        self.total_octets += octets;
        (self.flows[idx].octets, self.total_octets)
    }
}

/// The `inhibit_big_flows` module.
pub struct BigFlows {
    nrecent: i64,
    debug_period: i64,
    table: Arc<Mutex<FlowTable>>,
}

impl BigFlows {
    pub fn new() -> Self {
        BigFlows {
            nrecent: 0,
            debug_period: 0,
            table: Arc::new(Mutex::new(FlowTable::default())),
        }
    }
}

impl Default for BigFlows {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreModule for BigFlows {
    fn name(&self) -> &'static str {
        "inhibit_big_flows"
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
            table.flows = vec![Flow::default(); self.nrecent as usize];
            table.cursor = 0;
            table.total_octets = 0;
        }

        if self.debug_period > 0 {
            spawn_dump_thread(self.table.clone(), self.debug_period as u64);
        }
        true
    }

    fn weight(&mut self, pkt: &PacketView<'_>) -> f64 {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let (flow, total) = table.account(pkt.ip.saddr, pkt.ip.daddr, pkt.data.len() as u64);
        if flow == 0 {
            f64::EPSILON
        } else {
            total as f64 / flow as f64
        }
    }
}

/// Periodic flow-table dump, off the packet path. The thread is detached
/// and dies with the process.
fn spawn_dump_thread(table: Arc<Mutex<FlowTable>>, period_secs: u64) {
    let spawned = thread::Builder::new()
        .name("big-flows-dump".into())
        .spawn(move || loop {
            thread::sleep(Duration::from_secs(period_secs));
            let table = table.lock().unwrap_or_else(|e| e.into_inner());
            info!(total = table.total_octets, "inhibit_big_flows flow table");
            for (i, f) in table.flows.iter().enumerate() {
                info!(
                    slot = i,
                    src = %f.saddr,
                    dst = %f.daddr,
                    octets = f.octets,
                    "flow"
                );
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn inhibit_big_flows dump thread");
    }
}
