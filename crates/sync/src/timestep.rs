//! Fixed-rate step accumulator for drivers of the session.

pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Clamped so a stall cannot trigger a catch-up spiral.
    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(0.25);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_expected_tick_count() {
        let mut step = FixedTimestep::new(60);
        step.accumulate(3.5 / 60.0);
        let mut ticks = 0;
        while step.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
    }

    #[test]
    fn stall_is_clamped() {
        let mut step = FixedTimestep::new(60);
        step.accumulate(10.0);
        let mut ticks = 0;
        while step.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 15);
    }
}
