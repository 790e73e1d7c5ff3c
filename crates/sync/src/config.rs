use serde::{Deserialize, Serialize};

/// Engine tuning. The blend factor and distance threshold were tuned by
/// eye at the default tick rate; treat them as settings, not constants
/// to re-derive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local simulation steps per second (must match the server).
    pub tick_rate: u32,
    /// How many ticks behind the newest server tick the display runs.
    pub interpolation_depth: i32,
    /// Divergence (world units) between the displayed pose and the
    /// previous authoritative sample before correction blending kicks in.
    pub blend_threshold: f32,
    /// Share of the displayed pose kept when blending a late
    /// authoritative correction in.
    pub blend_factor: f32,
    /// Local steps between handshake retransmissions.
    pub retry_interval_steps: u32,
    /// Challenge datagrams sent before giving up.
    pub max_connect_attempts: u32,
    /// Steps without any server traffic before an established
    /// connection is declared dead.
    pub timeout_steps: u32,
    /// A sector with no snapshot newer than this many indices is
    /// considered settled and dropped from active simulation.
    pub sector_settle_horizon: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            interpolation_depth: 8,
            blend_threshold: 0.25,
            blend_factor: 0.8,
            retry_interval_steps: 140,
            max_connect_attempts: 4,
            timeout_steps: 1200,
            sector_settle_horizon: 64,
        }
    }
}

impl SyncConfig {
    pub fn step_seconds(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }
}
