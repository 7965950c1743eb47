//! Random scorer: `1 / (r + 1)` for a uniform integer `r`, giving every
//! packet a small positive jitter weight. Takes no configuration.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::{PacketView, ScoreModule};

pub struct Random {
    rng: StdRng,
}

impl Random {
    pub fn new() -> Self {
        Random {
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreModule for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn configure(&mut self, _key: &str, _value: &str) {}

    fn weight(&mut self, _pkt: &PacketView<'_>) -> f64 {
        let r: u32 = self.rng.random_range(0..1 << 31);
        1.0 / (r as f64 + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{udp_packet, view};
    use super::super::ScoreModule;
    use super::*;

    #[test]
    fn weight_is_positive_and_at_most_one() {
        let mut m = Random::new();
        let p = udp_packet([1, 1, 1, 1], [2, 2, 2, 2], b"x");
        for _ in 0..1000 {
            let w = m.weight(&view(&p, 0));
            assert!(w > 0.0 && w <= 1.0, "got {w}");
        }
    }

    #[test]
    fn finish_always_succeeds() {
        let mut m = Random::new();
        m.configure("anything", "ignored");
        assert!(m.finish());
    }
}
