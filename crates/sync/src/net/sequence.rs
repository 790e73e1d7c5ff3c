/// Slot count; sequences are compared through their low byte only, so
/// numbers 256 apart are indistinguishable. Round-trip latency is
/// assumed to stay far below 256 ticks.
pub const WINDOW_SIZE: usize = 256;

/// No real sequence reaches this within a session; send counters start
/// at zero and sessions are orders of magnitude shorter than 2^32 ticks.
const SLOT_EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceDecision {
    Accepted,
    Duplicate,
}

/// Duplicate filter over incoming datagram sequence numbers.
///
/// On `Accepted` the caller must queue an acknowledgement frame carrying
/// the sequence before processing the body.
#[derive(Debug)]
pub struct SequenceWindow {
    slots: [u32; WINDOW_SIZE],
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceWindow {
    pub fn new() -> Self {
        Self {
            slots: [SLOT_EMPTY; WINDOW_SIZE],
        }
    }

    pub fn accept(&mut self, sequence: u32) -> SequenceDecision {
        let slot = (sequence & 0xFF) as usize;
        if self.slots[slot] == sequence {
            return SequenceDecision::Duplicate;
        }
        self.slots[slot] = sequence;
        SequenceDecision::Accepted
    }

    pub fn reset(&mut self) {
        self.slots = [SLOT_EMPTY; WINDOW_SIZE];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_then_duplicate() {
        let mut window = SequenceWindow::new();
        for s in [0u32, 5, 255, 256, 1000] {
            assert_eq!(window.accept(s), SequenceDecision::Accepted);
            assert_eq!(window.accept(s), SequenceDecision::Duplicate);
        }
    }

    #[test]
    fn low_byte_collision_overwrites() {
        let mut window = SequenceWindow::new();
        assert_eq!(window.accept(3), SequenceDecision::Accepted);
        // 259 shares the slot with 3 but differs, so it is accepted and
        // replaces the stored value.
        assert_eq!(window.accept(259), SequenceDecision::Accepted);
        assert_eq!(window.accept(3), SequenceDecision::Accepted);
    }

    #[test]
    fn out_of_order_not_dropped() {
        let mut window = SequenceWindow::new();
        assert_eq!(window.accept(8), SequenceDecision::Accepted);
        assert_eq!(window.accept(7), SequenceDecision::Accepted);
    }

    #[test]
    fn reset_forgets_history() {
        let mut window = SequenceWindow::new();
        window.accept(42);
        window.reset();
        assert_eq!(window.accept(42), SequenceDecision::Accepted);
    }
}
