//! # Shaping buffer
//!
//! A fixed array of packet slots indexed by priority. Admission evicts
//! the minimum-priority slot when the newcomer outranks it; release takes
//! the maximum-priority slot. Both are linear scans — the buffer is small
//! (a few thousand slots at most) and a scan keeps per-packet cost flat,
//! where a heap would pay `O(log Q)` reordering on every admission *and*
//! need cross-pointer bookkeeping for the replace-min case.
//!
//! Pure state machine: the caller issues verdicts and charges statistics
//! from the returned [`Admission`] outcome.

use bytes::Bytes;

/// Priority of an empty slot. Every real priority is strictly greater
/// (the scorer floors combined weights at a small positive ε).
pub const EMPTY: f64 = f64::NEG_INFINITY;

#[derive(Debug, Clone)]
struct Slot {
    priority: f64,
    id: u32,
    payload: Bytes,
}

impl Slot {
    fn vacant() -> Self {
        Slot {
            priority: EMPTY,
            id: 0,
            payload: Bytes::new(),
        }
    }

    fn occupied(&self) -> bool {
        self.priority > EMPTY
    }
}

/// Outcome of offering a packet to the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The packet took a previously empty slot.
    Stored,
    /// The packet evicted a lower-priority occupant; the caller must
    /// issue `DROP` for the evicted id and charge its bytes as dropped.
    Replaced { dropped_id: u32, dropped_octets: u32 },
    /// Every slot outranks (or ties) the newcomer; the caller must issue
    /// `DROP` for the new packet itself.
    Rejected,
}

/// A packet removed from the buffer for release.
#[derive(Debug, Clone)]
pub struct Released {
    pub id: u32,
    pub payload: Bytes,
}

/// Fixed-capacity priority-replacement buffer.
pub struct Shaper {
    slots: Vec<Slot>,
}

impl Shaper {
    pub fn new(capacity: usize) -> Self {
        Shaper {
            slots: vec![Slot::vacant(); capacity.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied()).count()
    }

    /// Offer a packet with the given priority.
    ///
    /// The slot holding the minimum priority is found first; empty slots
    /// compare as [`EMPTY`] and therefore always lose. The comparison is
    /// strict, so on a tie the incumbent keeps its slot.
    pub fn admit(&mut self, id: u32, payload: Bytes, priority: f64) -> Admission {
        let mut idx = 0;
        let mut min = f64::INFINITY;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.priority < min {
                min = slot.priority;
                idx = i;
            }
        }

        if min >= priority {
            return Admission::Rejected;
        }

        let slot = &mut self.slots[idx];
        let outcome = if slot.occupied() {
            Admission::Replaced {
                dropped_id: slot.id,
                dropped_octets: slot.payload.len() as u32,
            }
        } else {
            Admission::Stored
        };

        slot.priority = priority;
        slot.id = id;
        slot.payload = payload;
        outcome
    }

    /// Remove and return the maximum-priority packet, if any slot is
    /// occupied.
    pub fn release_max(&mut self) -> Option<Released> {
        let mut idx = 0;
        let mut max = EMPTY;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.priority > max {
                max = slot.priority;
                idx = i;
            }
        }

        if max == EMPTY {
            return None;
        }

        let slot = &mut self.slots[idx];
        let released = Released {
            id: slot.id,
            payload: std::mem::take(&mut slot.payload),
        };
        slot.priority = EMPTY;
        slot.id = 0;
        Some(released)
    }
}
