//! Displayed-timeline tracking.
//!
//! The server's tick counter is only observed through datagrams, so the
//! locally displayed world index chases a delayed target instead of
//! mirroring it. Corrections are folded in at most one index per local
//! step; anything that would need a visible jump goes through a full
//! resync.

/// Fraction of the index error folded into the accumulator per step.
pub const CORRECTION_PERIOD: f32 = 1.0 / 16.0;
/// Window around the target index; falling outside forces a resync.
pub const MAX_BEHIND: i32 = 16;
pub const MAX_AHEAD: i32 = 16;

#[derive(Debug)]
pub struct WorldClock {
    world_index: i32,
    accumulator: f32,
    last_server_tick: Option<i32>,
    interpolation_depth: i32,
}

impl WorldClock {
    pub fn new(interpolation_depth: i32) -> Self {
        Self {
            world_index: 0,
            accumulator: 0.0,
            last_server_tick: None,
            interpolation_depth,
        }
    }

    pub fn world_index(&self) -> i32 {
        self.world_index
    }

    pub fn last_server_tick(&self) -> Option<i32> {
        self.last_server_tick
    }

    /// Records a server tick seen in an incoming message. Datagrams can
    /// arrive reordered, so only a newer tick moves the watermark.
    pub fn observe_server_tick(&mut self, tick: i32) {
        if self.last_server_tick.is_none_or(|last| tick > last) {
            self.last_server_tick = Some(tick);
        }
    }

    /// The index the display should be showing: the newest known server
    /// tick held back by the interpolation depth. Zero until the first
    /// tick is observed.
    pub fn target_index(&self) -> i32 {
        match self.last_server_tick {
            Some(tick) => (tick - self.interpolation_depth).max(0),
            None => 0,
        }
    }

    /// Advances the displayed index by one step, folding in at most one
    /// index of drift correction. Returns the correction applied, for
    /// diagnostics.
    pub fn step(&mut self) -> i32 {
        let delta = self.target_index() - self.world_index;
        if delta > MAX_BEHIND || delta < -MAX_AHEAD {
            log::debug!(
                "world index {} out of window around {}, resyncing",
                self.world_index,
                self.target_index()
            );
            self.resync();
            return 0;
        }

        if delta == 0 {
            self.accumulator = 0.0;
        } else {
            self.accumulator += delta as f32 * CORRECTION_PERIOD;
        }

        let correction = self.accumulator as i32;
        if correction != 0 {
            self.accumulator = 0.0;
        }
        self.world_index += 1 + correction;
        correction
    }

    /// Snaps the displayed index onto the target. Called on connect, on
    /// map change, and when the locally-tracked object teleports.
    pub fn resync(&mut self) {
        self.world_index = self.target_index();
        self.accumulator = 0.0;
    }

    pub fn reset(&mut self) {
        self.world_index = 0;
        self.accumulator = 0.0;
        self.last_server_tick = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_clamped_before_first_tick() {
        let clock = WorldClock::new(8);
        assert_eq!(clock.target_index(), 0);

        let mut clock = WorldClock::new(8);
        clock.observe_server_tick(3);
        assert_eq!(clock.target_index(), 0);
    }

    #[test]
    fn stale_tick_does_not_move_watermark() {
        let mut clock = WorldClock::new(8);
        clock.observe_server_tick(100);
        clock.observe_server_tick(90);
        assert_eq!(clock.last_server_tick(), Some(100));
    }

    #[test]
    fn converges_from_any_offset_within_window() {
        for offset in -16i32..=16 {
            let mut clock = WorldClock::new(8);
            let mut tick = 100;
            clock.observe_server_tick(tick);
            clock.resync();
            clock.world_index -= offset;

            // Server keeps ticking at the nominal rate; drift has to be
            // absorbed by corrections alone.
            for step in 0..600 {
                tick += 1;
                clock.observe_server_tick(tick);
                let correction = clock.step();
                assert!(correction.abs() <= 1, "correction bounded by one index");
                // Steady state dithers by at most one index around the
                // target and must hold once the drift is absorbed.
                if step >= 500 {
                    assert!(
                        (clock.target_index() - clock.world_index()).abs() <= 1,
                        "offset {offset} did not settle"
                    );
                }
            }
            assert_eq!(clock.accumulator, 0.0, "offset {offset} left residual drift");
        }
    }

    #[test]
    fn resync_is_idempotent() {
        let mut clock = WorldClock::new(8);
        clock.observe_server_tick(200);
        clock.resync();
        let first = clock.world_index();
        clock.resync();
        assert_eq!(clock.world_index(), first);
        assert_eq!(clock.world_index(), clock.target_index());
    }

    #[test]
    fn large_gap_forces_resync_not_crawl() {
        // Ticks 100 then 116 with depth 8: target lands at 108 while
        // the display sits at 50, far outside the window.
        let mut clock = WorldClock::new(8);
        clock.observe_server_tick(100);
        clock.world_index = 50;
        clock.observe_server_tick(116);
        assert_eq!(clock.target_index(), 108);

        let correction = clock.step();
        assert_eq!(correction, 0);
        assert_eq!(clock.world_index(), 108);
        assert_eq!(clock.accumulator, 0.0);
    }

    #[test]
    fn in_sync_step_advances_by_one() {
        let mut clock = WorldClock::new(8);
        clock.observe_server_tick(100);
        clock.resync();
        let before = clock.world_index();
        clock.observe_server_tick(101);
        // One index behind now; accumulator charges but stays below a
        // whole index.
        let correction = clock.step();
        assert_eq!(correction, 0);
        assert_eq!(clock.world_index(), before + 1);
    }

    #[test]
    fn reset_clears_server_knowledge() {
        let mut clock = WorldClock::new(8);
        clock.observe_server_tick(500);
        clock.resync();
        clock.reset();
        assert_eq!(clock.world_index(), 0);
        assert_eq!(clock.target_index(), 0);
        assert_eq!(clock.last_server_tick(), None);
    }
}
