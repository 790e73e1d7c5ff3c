//! Entity snapshots and the displayed pose derived from them.

use glam::{Quat, Vec3};

use super::{History, Timestamped};
use crate::config::SyncConfig;
use crate::net::protocol::EntityStateMsg;

/// One authoritative entity sample, dequantized from the wire form.
#[derive(Debug, Clone, Copy)]
pub struct EntitySnapshot {
    pub entity_id: u32,
    pub world_index: i32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Quat,
    pub animation_state: u8,
    pub animation_frame: u8,
    pub teleport: bool,
}

impl EntitySnapshot {
    pub fn from_message(msg: &EntityStateMsg) -> Self {
        let vel = msg.decode_velocity();
        let quat = msg.decode_orientation();
        Self {
            entity_id: msg.entity_id,
            world_index: msg.world_index,
            position: Vec3::from_array(msg.position),
            velocity: Vec3::from_array(vel),
            orientation: Quat::from_xyzw(quat[0], quat[1], quat[2], quat[3]).normalize(),
            animation_state: msg.animation_state,
            animation_frame: msg.animation_frame,
            teleport: msg.is_teleport(),
        }
    }
}

impl Timestamped for EntitySnapshot {
    fn world_index(&self) -> i32 {
        self.world_index
    }
}

/// The pose actually shown for one entity. Chases the snapshot ring at
/// the displayed world index, smoothing late corrections instead of
/// popping to them.
#[derive(Debug, Clone, Copy)]
pub struct RenderEntity {
    pub entity_id: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Quat,
    pub animation_state: u8,
    pub animation_frame: u8,
    has_pose: bool,
}

impl RenderEntity {
    pub fn new(entity_id: u32) -> Self {
        Self {
            entity_id,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            animation_state: 0,
            animation_frame: 0,
            has_pose: false,
        }
    }

    /// Moves the displayed pose to the sample at `index`.
    ///
    /// Teleport samples are applied raw and forget the previous pose so
    /// no later correction interpolates across the jump. A divergence
    /// larger than the threshold is folded in gradually; smaller ones
    /// snap, the eye cannot see them. Blending needs a continuous run,
    /// so a sample landing right after a gap is applied raw as well. A
    /// missing sample extrapolates along the last known velocity.
    pub fn advance(&mut self, history: &History<EntitySnapshot>, index: i32, cfg: &SyncConfig, dt: f32) {
        match history.get(index) {
            Some(sample) if sample.teleport || !self.has_pose => {
                self.position = sample.position;
                self.orientation = sample.orientation;
                self.apply_shared(sample);
            }
            Some(sample) => {
                let has_prev = history.get(index - 1).is_some();
                let divergence = sample.position.distance(self.position);
                if has_prev && divergence > cfg.blend_threshold {
                    self.position = sample.position.lerp(self.position, cfg.blend_factor);
                    self.orientation = sample
                        .orientation
                        .slerp(self.orientation, cfg.blend_factor)
                        .normalize();
                } else {
                    self.position = sample.position;
                    self.orientation = sample.orientation;
                }
                self.apply_shared(sample);
            }
            None => {
                self.position += self.velocity * dt;
            }
        }
    }

    fn apply_shared(&mut self, sample: &EntitySnapshot) {
        self.velocity = sample.velocity;
        self.animation_state = sample.animation_state;
        self.animation_frame = sample.animation_frame;
        self.has_pose = true;
    }
}
