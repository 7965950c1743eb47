//! Firewall-mark table scorer.
//!
//! Each config line `bymark <mark> <weight>` appends one entry; a packet
//! scores the first entry matching its kernel mark, or a small positive
//! default when nothing matches. Negative table weights are legitimate:
//! they make the chain drop matching packets unconditionally.

use tracing::warn;

use super::{PacketView, ScoreModule};

/// The `bymark` module.
pub struct ByMark {
    table: Vec<(u32, f64)>,
}

impl ByMark {
    pub fn new() -> Self {
        ByMark { table: Vec::new() }
    }
}

impl Default for ByMark {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreModule for ByMark {
    fn name(&self) -> &'static str {
        "bymark"
    }

    fn configure(&mut self, key: &str, value: &str) {
        let mark = match key.parse::<u32>() {
            Ok(m) => m,
            Err(_) => {
                warn!(module = self.name(), mark = key, "can't parse mark");
                return;
            }
        };
        let weight = match value.parse::<f64>() {
            Ok(w) => w,
            Err(_) => {
                warn!(module = self.name(), mark, weight = value, "can't parse weight");
                return;
            }
        };
        self.table.push((mark, weight));
    }

    fn weight(&mut self, pkt: &PacketView<'_>) -> f64 {
        self.table
            .iter()
            .find(|(mark, _)| *mark == pkt.mark)
            .map(|(_, w)| *w)
            .unwrap_or(f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{udp_packet, view};
    use super::super::ScoreModule;
    use super::*;

    fn module(entries: &[(u32, f64)]) -> ByMark {
        let mut m = ByMark::new();
        for (mark, w) in entries {
            m.configure(&mark.to_string(), &w.to_string());
        }
        assert!(m.finish());
        m
    }

    #[test]
    fn matching_mark_returns_table_weight() {
        let mut m = module(&[(7, 10.0), (9, 1.0)]);
        let p = udp_packet([1, 1, 1, 1], [2, 2, 2, 2], b"x");
        assert_eq!(m.weight(&view(&p, 7)), 10.0);
        assert_eq!(m.weight(&view(&p, 9)), 1.0);
    }

    #[test]
    fn unmatched_mark_returns_small_default() {
        let mut m = module(&[(7, 10.0)]);
        let p = udp_packet([1, 1, 1, 1], [2, 2, 2, 2], b"x");
        let w = m.weight(&view(&p, 12345));
        assert!(w > 0.0 && w <= f64::EPSILON);
    }

    #[test]
    fn first_match_wins() {
        let mut m = module(&[(5, 2.0), (5, 99.0)]);
        let p = udp_packet([1, 1, 1, 1], [2, 2, 2, 2], b"x");
        assert_eq!(m.weight(&view(&p, 5)), 2.0);
    }

    #[test]
    fn negative_entry_is_preserved() {
        let mut m = module(&[(0xdead, -1.0)]);
        let p = udp_packet([1, 1, 1, 1], [2, 2, 2, 2], b"x");
        assert_eq!(m.weight(&view(&p, 0xdead)), -1.0);
    }

    #[test]
    fn unparseable_lines_are_skipped() {
        let mut m = ByMark::new();
        m.configure("not-a-mark", "1.0");
        m.configure("7", "not-a-weight");
        m.configure("7", "3.0");
        let p = udp_packet([1, 1, 1, 1], [2, 2, 2, 2], b"x");
        assert_eq!(m.weight(&view(&p, 7)), 3.0);
    }

    #[test]
    fn empty_table_always_defaults() {
        let mut m = module(&[]);
        let p = udp_packet([1, 1, 1, 1], [2, 2, 2, 2], b"x");
        assert!(m.weight(&view(&p, 0)) <= f64::EPSILON);
    }
}
