//! Release-loop pacing math.
//!
//! The release thread paces by sleeping *after* each emission for the
//! time the packet would occupy the wire at the configured byte rate.
//! There is no token bucket: long-run throughput converges on the limit
//! while a burst costs one packet at line rate plus its sleep.

use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Bytes' worth of idle sleep when the buffer is empty.
const IDLE_BURST_BYTES: u64 = 100;

/// Substitute rate used for pacing when the configured limit is one of
/// the reserved values (0 = block all, `u64::MAX` = no shaping). Those
/// packets never reach the buffer, so the release loop only needs a
/// polling cadence: 1000 bytes/sec puts the idle sleep at ~0.1 s.
const FALLBACK_PACING_BPS: u64 = 1000;

/// Limit value meaning "drop every packet".
pub const LIMIT_BLOCK_ALL: u64 = 0;

/// Limit value meaning "accept every packet unshaped".
pub const LIMIT_UNLIMITED: u64 = u64::MAX;

/// True for the two reserved limits that bypass the buffer in ingress.
pub fn is_reserved_limit(limit: u64) -> bool {
    limit == LIMIT_BLOCK_ALL || limit == LIMIT_UNLIMITED
}

/// The rate the release loop paces against.
pub fn effective_rate(limit: u64) -> u64 {
    if is_reserved_limit(limit) {
        FALLBACK_PACING_BPS
    } else {
        limit
    }
}

/// Sleep after emitting `octets` at `rate` bytes/sec.
pub fn send_delay(octets: u64, rate: u64) -> Duration {
    Duration::from_nanos(octets.saturating_mul(NANOS_PER_SEC) / rate.max(1))
}

/// Sleep when there is nothing to send: the time 100 bytes would take.
pub fn idle_delay(rate: u64) -> Duration {
    send_delay(IDLE_BURST_BYTES, rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_delay_matches_rate() {
        // 125 kB/s (1 Mbit/s): a 125-byte packet costs 1 ms.
        assert_eq!(send_delay(125, 125_000), Duration::from_millis(1));
        // 1 byte/s: a 2-byte packet costs 2 s.
        assert_eq!(send_delay(2, 1), Duration::from_secs(2));
    }

    #[test]
    fn idle_delay_is_100_bytes_worth() {
        assert_eq!(idle_delay(1000), Duration::from_millis(100));
        assert_eq!(idle_delay(100_000), Duration::from_millis(1));
    }

    #[test]
    fn reserved_limits_use_fallback_rate() {
        assert_eq!(effective_rate(LIMIT_BLOCK_ALL), 1000);
        assert_eq!(effective_rate(LIMIT_UNLIMITED), 1000);
        assert_eq!(effective_rate(125_000), 125_000);
    }

    #[test]
    fn reserved_limit_detection() {
        assert!(is_reserved_limit(0));
        assert!(is_reserved_limit(u64::MAX));
        assert!(!is_reserved_limit(1));
        assert!(!is_reserved_limit(u64::MAX - 1));
    }

    #[test]
    fn send_delay_clamps_zero_rate_to_one() {
        assert!(send_delay(100, 0) > Duration::ZERO);
    }

    #[test]
    fn max_packet_does_not_overflow() {
        let d = send_delay(65_535, 1);
        assert_eq!(d, Duration::from_secs(65_535));
    }
}
