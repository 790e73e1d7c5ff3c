//! Sector mover snapshots.
//!
//! Sectors replicate floor and ceiling movers (lifts, doors, crushers).
//! Unlike entities they carry their own motion plan, so a missing
//! sample is covered by integrating the mover toward its target rather
//! than by extrapolating a velocity.

use super::{History, Timestamped};
use crate::net::protocol::SectorStateMsg;

#[derive(Debug, Clone, Copy)]
pub struct SectorSnapshot {
    pub sector_id: u32,
    pub world_index: i32,
    pub floor_height: f32,
    pub ceiling_height: f32,
    pub floor_target: f32,
    pub floor_speed: f32,
    pub ceiling_target: f32,
    pub ceiling_speed: f32,
    pub instant: bool,
}

impl SectorSnapshot {
    pub fn from_message(msg: &SectorStateMsg) -> Self {
        Self {
            sector_id: msg.sector_id,
            world_index: msg.world_index,
            floor_height: msg.floor_height,
            ceiling_height: msg.ceiling_height,
            floor_target: msg.floor_target,
            floor_speed: msg.floor_speed,
            ceiling_target: msg.ceiling_target,
            ceiling_speed: msg.ceiling_speed,
            instant: msg.is_instant(),
        }
    }
}

impl Timestamped for SectorSnapshot {
    fn world_index(&self) -> i32 {
        self.world_index
    }
}

/// Displayed state of one sector's movers.
#[derive(Debug, Clone, Copy)]
pub struct RenderSector {
    pub sector_id: u32,
    pub floor_height: f32,
    pub ceiling_height: f32,
    floor_target: f32,
    floor_speed: f32,
    ceiling_target: f32,
    ceiling_speed: f32,
    has_state: bool,
}

impl RenderSector {
    pub fn new(sector_id: u32) -> Self {
        Self {
            sector_id,
            floor_height: 0.0,
            ceiling_height: 0.0,
            floor_target: 0.0,
            floor_speed: 0.0,
            ceiling_target: 0.0,
            ceiling_speed: 0.0,
            has_state: false,
        }
    }

    /// Applies the sample at `index` directly; geometry corrections do
    /// not need entity-style smoothing. A missing sample integrates the
    /// current motion plan by one step.
    pub fn advance(&mut self, history: &History<SectorSnapshot>, index: i32, dt: f32) {
        match history.get(index) {
            Some(sample) => {
                self.floor_height = sample.floor_height;
                self.ceiling_height = sample.ceiling_height;
                self.floor_target = sample.floor_target;
                self.floor_speed = sample.floor_speed;
                self.ceiling_target = sample.ceiling_target;
                self.ceiling_speed = sample.ceiling_speed;
                self.has_state = true;
            }
            None if self.has_state => {
                self.floor_height = step_toward(self.floor_height, self.floor_target, self.floor_speed * dt);
                self.ceiling_height =
                    step_toward(self.ceiling_height, self.ceiling_target, self.ceiling_speed * dt);
            }
            None => {}
        }
    }

    /// Both movers have reached their targets; the sector is a
    /// candidate for pruning once its history goes stale.
    pub fn settled(&self) -> bool {
        self.has_state
            && self.floor_height == self.floor_target
            && self.ceiling_height == self.ceiling_target
    }
}

fn step_toward(current: f32, target: f32, max_delta: f32) -> f32 {
    let delta = target - current;
    if delta.abs() <= max_delta {
        target
    } else {
        current + max_delta.copysign(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(index: i32, floor: f32, target: f32, speed: f32) -> SectorSnapshot {
        SectorSnapshot {
            sector_id: 4,
            world_index: index,
            floor_height: floor,
            ceiling_height: 128.0,
            floor_target: target,
            floor_speed: speed,
            ceiling_target: 128.0,
            ceiling_speed: 0.0,
            instant: false,
        }
    }

    #[test]
    fn sample_applies_directly() {
        let mut history = History::new();
        history.add(snapshot(30, 16.0, 64.0, 8.0));

        let mut sector = RenderSector::new(4);
        sector.advance(&history, 30, 1.0 / 60.0);
        assert_eq!(sector.floor_height, 16.0);
        assert!(!sector.settled());
    }

    #[test]
    fn missing_sample_integrates_motion_plan() {
        let mut history = History::new();
        history.add(snapshot(30, 16.0, 64.0, 60.0));

        let mut sector = RenderSector::new(4);
        let dt = 1.0 / 60.0;
        sector.advance(&history, 30, dt);
        sector.advance(&history, 31, dt);
        assert!((sector.floor_height - 17.0).abs() < 1e-4);
    }

    #[test]
    fn mover_stops_at_target() {
        let mut history = History::new();
        history.add(snapshot(30, 63.9, 64.0, 600.0));

        let mut sector = RenderSector::new(4);
        let dt = 1.0 / 60.0;
        sector.advance(&history, 30, dt);
        sector.advance(&history, 31, dt);
        assert_eq!(sector.floor_height, 64.0);
        assert!(sector.settled());
    }

    #[test]
    fn no_state_means_no_motion() {
        let history = History::new();
        let mut sector = RenderSector::new(4);
        sector.advance(&history, 5, 1.0 / 60.0);
        assert_eq!(sector.floor_height, 0.0);
        assert!(!sector.settled());
    }
}
