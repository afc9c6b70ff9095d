// SPDX-License-Identifier: CEPL-1.0
//! CPU-side bookkeeping for frames in flight.
//!
//! The GPU objects themselves (fences, events, semaphores) stay in the
//! backends; this module only decides *which* value or slot to wait on.

/// Frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Expected completion values for a single monotonically increasing fence,
/// one per back buffer.
///
/// A slot whose value is still ahead of the fence's completed value holds
/// resources the GPU may be reading, so the CPU must wait before reusing it.
#[derive(Debug, Clone)]
pub struct FenceLedger {
    expected: Vec<u64>,
    next: u64,
}

impl FenceLedger {
    /// Fences start at 0; the first value handed out is 1.
    pub fn new(slots: usize) -> Self {
        Self {
            expected: vec![0; slots],
            next: 1,
        }
    }

    /// Allocates the value to signal after submitting work for `slot`.
    pub fn signal(&mut self, slot: usize) -> u64 {
        let value = self.take_next();
        self.expected[slot] = value;
        value
    }

    /// The value to wait for before `slot` may be reused, if the GPU has not
    /// reached it yet.
    pub fn pending(&self, slot: usize, completed: u64) -> Option<u64> {
        let value = self.expected[slot];
        (completed < value).then_some(value)
    }

    /// Allocates a value covering everything submitted so far. Waiting for it
    /// drains the queue.
    pub fn drain(&mut self) -> u64 {
        self.take_next()
    }

    /// Forgets per-slot expectations (after the back buffers were recreated).
    /// The counter keeps going so values stay monotonic on the fence.
    pub fn reset_slots(&mut self, slots: usize) {
        self.expected.clear();
        self.expected.resize(slots, 0);
    }

    fn take_next(&mut self) -> u64 {
        let value = self.next;
        self.next += 1;
        value
    }
}

/// Round-robin index over per-frame resources.
#[derive(Debug, Clone, Copy)]
pub struct FrameCursor {
    index: usize,
    count: usize,
}

impl FrameCursor {
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "FrameCursor needs at least one frame");
        Self { index: 0, count }
    }

    pub fn current(&self) -> usize {
        self.index
    }

    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.count;
        self.index
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ledger_never_waits() {
        let ledger = FenceLedger::new(FRAMES_IN_FLIGHT);
        assert_eq!(ledger.pending(0, 0), None);
        assert_eq!(ledger.pending(1, 0), None);
    }

    #[test]
    fn signal_values_increase_across_slots() {
        let mut ledger = FenceLedger::new(2);
        assert_eq!(ledger.signal(0), 1);
        assert_eq!(ledger.signal(1), 2);
        assert_eq!(ledger.signal(0), 3);
        assert_eq!(ledger.drain(), 4);
    }

    #[test]
    fn pending_tracks_each_slot_independently() {
        let mut ledger = FenceLedger::new(2);
        ledger.signal(0); // 1
        ledger.signal(1); // 2

        // GPU finished frame 0 only
        assert_eq!(ledger.pending(0, 1), None);
        assert_eq!(ledger.pending(1, 1), Some(2));

        // GPU caught up
        assert_eq!(ledger.pending(1, 2), None);
    }

    #[test]
    fn two_frames_in_flight_bound() {
        // Simulates a GPU that never completes anything: after one signal per
        // back buffer, every slot must wait.
        let mut ledger = FenceLedger::new(FRAMES_IN_FLIGHT);
        for slot in 0..FRAMES_IN_FLIGHT {
            assert_eq!(ledger.pending(slot, 0), None);
            ledger.signal(slot);
        }
        for slot in 0..FRAMES_IN_FLIGHT {
            assert!(ledger.pending(slot, 0).is_some());
        }
    }

    #[test]
    fn drain_covers_all_slots() {
        let mut ledger = FenceLedger::new(2);
        ledger.signal(0);
        ledger.signal(1);
        let fence = ledger.drain();
        assert_eq!(fence, 3);
        assert_eq!(ledger.pending(0, fence), None);
        assert_eq!(ledger.pending(1, fence), None);
    }

    #[test]
    fn reset_keeps_counter_monotonic() {
        let mut ledger = FenceLedger::new(2);
        ledger.signal(0);
        ledger.signal(1);
        ledger.reset_slots(3);
        assert_eq!(ledger.pending(1, 0), None);
        assert_eq!(ledger.signal(2), 3);
    }

    #[test]
    fn cursor_wraps() {
        let mut cursor = FrameCursor::new(FRAMES_IN_FLIGHT);
        assert_eq!(cursor.current(), 0);
        assert_eq!(cursor.advance(), 1);
        assert_eq!(cursor.advance(), 0);
        cursor.advance();
        cursor.reset();
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    #[should_panic]
    fn cursor_rejects_zero_frames() {
        let _ = FrameCursor::new(0);
    }
}
