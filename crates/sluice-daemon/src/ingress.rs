//! Ingress scorer — the per-packet path.
//!
//! Order of operations for each diverted packet:
//!
//! 1. Under the lock: read the limit; if it is one of the reserved
//!    values the verdict is issued inline and the packet never reaches
//!    the buffer.
//! 2. With no lock held: parse the IPv4 header and run the scoring
//!    chain.
//! 3. Under the lock, per module: fold the `k·w` contributions into the
//!    weight-chart accumulators.
//! 4. Under the lock: drop (negative combined weight) or offer the
//!    packet to the shaping buffer and issue the eviction/rejection
//!    verdict the admission outcome demands.

use tracing::{trace, warn};

use sluice_engine::ipv4;
use sluice_engine::pacing;
use sluice_engine::score::{ChainVerdict, PacketView, ScoreChain};
use sluice_engine::shaper::Admission;

use crate::nfq::PacketEvent;
use crate::state::{lock, SharedState};
use crate::verdict::VerdictSink;

/// Fold `k·w` contributions into the weight-chart accumulators, taking
/// the lock once per module.
fn accumulate(shared: &SharedState, contributions: &[(usize, f64)]) {
    for (i, kw) in contributions {
        let mut st = lock(shared);
        st.weights[*i].add(*kw);
    }
}

pub fn handle_packet(
    shared: &SharedState,
    chain: &mut ScoreChain,
    verdicts: &dyn VerdictSink,
    pkt: PacketEvent,
) {
    let octets = pkt.payload.len();

    let (limit, wchart) = {
        let mut st = lock(shared);
        match st.limit {
            pacing::LIMIT_BLOCK_ALL => {
                if let Err(e) = verdicts.drop_packet(pkt.id) {
                    warn!(id = pkt.id, error = %e, "drop verdict failed");
                }
                st.charge_drop(octets);
            }
            pacing::LIMIT_UNLIMITED => {
                if let Err(e) = verdicts.accept(pkt.id, &pkt.payload) {
                    warn!(id = pkt.id, error = %e, "accept verdict failed");
                }
                st.charge_pass(octets);
            }
            _ => {}
        }
        (st.limit, st.recorder.wchart_enabled())
    };
    if pacing::is_reserved_limit(limit) {
        return;
    }

    let Some(ip) = ipv4::parse(&pkt.payload) else {
        trace!(id = pkt.id, len = octets, "skipping unparseable packet");
        return;
    };
    let view = PacketView {
        data: &pkt.payload,
        mark: pkt.mark,
        ip,
    };

    match chain.score(&view) {
        ChainVerdict::Reject {
            weight,
            contributions,
        } => {
            if wchart {
                accumulate(shared, &contributions);
            }
            let mut st = lock(shared);
            if let Err(e) = verdicts.drop_packet(pkt.id) {
                warn!(id = pkt.id, error = %e, "drop verdict failed");
            }
            st.charge_drop(octets);
            trace!(id = pkt.id, weight, "dropped by module");
        }
        ChainVerdict::Weight {
            total,
            contributions,
        } => {
            if wchart {
                accumulate(shared, &contributions);
            }

            let mut st = lock(shared);
            match st.shaper.admit(pkt.id, pkt.payload.clone(), total) {
                Admission::Stored => {}
                Admission::Replaced {
                    dropped_id,
                    dropped_octets,
                } => {
                    if let Err(e) = verdicts.drop_packet(dropped_id) {
                        warn!(id = dropped_id, error = %e, "drop verdict failed");
                    }
                    st.charge_drop(dropped_octets as usize);
                }
                Admission::Rejected => {
                    if let Err(e) = verdicts.drop_packet(pkt.id) {
                        warn!(id = pkt.id, error = %e, "drop verdict failed");
                    }
                    st.charge_drop(octets);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use crate::verdict::testutil::{RecordingSink, Verdict};
    use bytes::Bytes;
    use sluice_engine::score::ScoreChain;
    use sluice_stats::recorder::Recorder;

    fn udp_event(id: u32, mark: u32, payload_len: usize) -> PacketEvent {
        let mut p = vec![0u8; 20];
        p[0] = 0x45;
        p[9] = ipv4::PROTO_UDP;
        p[12..16].copy_from_slice(&[10, 0, 0, 1]);
        p[16..20].copy_from_slice(&[10, 0, 0, 2]);
        let mut udp_hdr = vec![0u8; 8];
        udp_hdr[0..2].copy_from_slice(&1000u16.to_be_bytes());
        udp_hdr[2..4].copy_from_slice(&2000u16.to_be_bytes());
        p.extend_from_slice(&udp_hdr);
        p.extend_from_slice(&vec![0u8; payload_len]);
        PacketEvent {
            id,
            mark,
            payload: Bytes::from(p),
        }
    }

    fn stats_state(limit: u64, capacity: usize, modules: usize) -> (SharedState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path().to_path_buf(), 365, vec![], false);
        (
            State::new(limit, capacity, modules, 0, rec).shared(),
            dir,
        )
    }

    fn bymark_chain(entries: &[(u32, f64)]) -> ScoreChain {
        let mut chain = ScoreChain::standard();
        for (mark, w) in entries {
            chain.configure("bymark", &mark.to_string(), &w.to_string());
        }
        chain.finalize();
        chain
    }

    #[test]
    fn limit_zero_drops_inline() {
        let (shared, _dir) = stats_state(0, 4, 0);
        let mut chain = bymark_chain(&[]);
        let sink = RecordingSink::new();

        handle_packet(&shared, &mut chain, &sink, udp_event(1, 0, 100));

        assert_eq!(sink.taken(), vec![Verdict::Drop { id: 1 }]);
        let st = lock(&shared);
        assert_eq!(st.bucket.packets_drop, 1);
        assert_eq!(st.bucket.octets_drop, 128);
        assert_eq!(st.shaper.occupied(), 0);
    }

    #[test]
    fn unlimited_accepts_inline() {
        let (shared, _dir) = stats_state(u64::MAX, 4, 0);
        let mut chain = bymark_chain(&[]);
        let sink = RecordingSink::new();

        handle_packet(&shared, &mut chain, &sink, udp_event(2, 0, 100));

        assert_eq!(
            sink.taken(),
            vec![Verdict::Accept {
                id: 2,
                octets: 128
            }]
        );
        let st = lock(&shared);
        assert_eq!(st.bucket.packets_pass, 1);
        assert_eq!(st.shaper.occupied(), 0);
    }

    #[test]
    fn negative_module_weight_drops_and_charges() {
        let (shared, _dir) = stats_state(125_000, 4, 0);
        let mut chain = bymark_chain(&[(0xdead, -1.0)]);
        let sink = RecordingSink::new();

        handle_packet(&shared, &mut chain, &sink, udp_event(3, 0xdead, 60));

        assert_eq!(sink.taken(), vec![Verdict::Drop { id: 3 }]);
        let st = lock(&shared);
        assert_eq!(st.bucket.packets_drop, 1);
    }

    #[test]
    fn admitted_packet_waits_in_buffer() {
        let (shared, _dir) = stats_state(125_000, 4, 0);
        let mut chain = bymark_chain(&[]);
        let sink = RecordingSink::new();

        handle_packet(&shared, &mut chain, &sink, udp_event(4, 0, 60));

        assert!(sink.taken().is_empty(), "no verdict until release");
        let st = lock(&shared);
        assert_eq!(st.shaper.occupied(), 1);
        assert!(st.bucket.is_zero());
    }

    #[test]
    fn eviction_issues_drop_for_loser() {
        let (shared, _dir) = stats_state(125_000, 1, 0);
        let mut chain = bymark_chain(&[(7, 10.0), (9, 1.0)]);
        let sink = RecordingSink::new();

        handle_packet(&shared, &mut chain, &sink, udp_event(1, 9, 100));
        handle_packet(&shared, &mut chain, &sink, udp_event(2, 7, 100));

        assert_eq!(sink.taken(), vec![Verdict::Drop { id: 1 }]);
        let st = lock(&shared);
        assert_eq!(st.bucket.packets_drop, 1);
        assert_eq!(st.bucket.octets_drop, 128);
        assert_eq!(st.shaper.occupied(), 1);
    }

    #[test]
    fn outranked_newcomer_is_dropped() {
        let (shared, _dir) = stats_state(125_000, 1, 0);
        let mut chain = bymark_chain(&[(7, 10.0), (9, 1.0)]);
        let sink = RecordingSink::new();

        handle_packet(&shared, &mut chain, &sink, udp_event(1, 7, 100));
        handle_packet(&shared, &mut chain, &sink, udp_event(2, 9, 100));

        assert_eq!(sink.taken(), vec![Verdict::Drop { id: 2 }]);
    }

    #[test]
    fn truncated_packet_gets_no_verdict() {
        let (shared, _dir) = stats_state(125_000, 4, 0);
        let mut chain = bymark_chain(&[]);
        let sink = RecordingSink::new();

        let pkt = PacketEvent {
            id: 9,
            mark: 0,
            payload: Bytes::from_static(&[0x45, 0x00, 0x00]),
        };
        handle_packet(&shared, &mut chain, &sink, pkt);

        assert!(sink.taken().is_empty());
        let st = lock(&shared);
        assert!(st.bucket.is_zero());
        assert_eq!(st.shaper.occupied(), 0);
    }

    #[test]
    fn wchart_accumulates_module_contributions() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(
            dir.path().to_path_buf(),
            365,
            vec![
                "inhibit_big_flows".into(),
                "entropy".into(),
                "bymark".into(),
                "random".into(),
            ],
            true,
        );
        let shared = State::new(125_000, 4, 4, 0, rec).shared();
        let mut chain = bymark_chain(&[(5, 4.0)]);
        let sink = RecordingSink::new();

        handle_packet(&shared, &mut chain, &sink, udp_event(1, 5, 50));

        let st = lock(&shared);
        // bymark is chain entry 2; its contribution is 4.0 · k=1.
        assert_eq!(st.weights[2].nw, 1.0);
        assert!((st.weights[2].stw - 4.0).abs() < 1e-12);
        // disabled flow modules contributed nothing.
        assert_eq!(st.weights[0].nw, 0.0);
        assert_eq!(st.weights[1].nw, 0.0);
        // random contributed one sample.
        assert_eq!(st.weights[3].nw, 1.0);
    }
}
