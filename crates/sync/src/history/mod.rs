//! Per-object snapshot rings.
//!
//! Every replicated object keeps a short history of authoritative
//! samples keyed by world index. Slots are addressed modulo the
//! capacity, so writing a new index naturally evicts the sample it
//! displaced; readers validate the stored index before trusting a slot.

mod entity;
mod sector;

pub use entity::{EntitySnapshot, RenderEntity};
pub use sector::{RenderSector, SectorSnapshot};

/// Ring capacity. At the default tick rate this is about half a second
/// of history, comfortably past the interpolation depth.
pub const NUM_SNAPSHOTS: usize = 32;

pub trait Timestamped {
    fn world_index(&self) -> i32;
}

#[derive(Debug, Clone)]
pub struct History<T> {
    slots: Vec<Option<T>>,
    newest: Option<i32>,
}

impl<T: Timestamped> Default for History<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Timestamped> History<T> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(NUM_SNAPSHOTS);
        slots.resize_with(NUM_SNAPSHOTS, || None);
        Self {
            slots,
            newest: None,
        }
    }

    fn slot(index: i32) -> usize {
        index.rem_euclid(NUM_SNAPSHOTS as i32) as usize
    }

    /// Stores a sample at its own world index, displacing whatever the
    /// slot held. Late arrivals for an already-evicted index simply
    /// resurrect old data in the slot; `get` validation keeps readers
    /// honest.
    pub fn add(&mut self, sample: T) {
        let index = sample.world_index();
        self.slots[Self::slot(index)] = Some(sample);
        if self.newest.is_none_or(|n| index > n) {
            self.newest = Some(index);
        }
    }

    /// The sample for exactly this world index, if it is still held.
    pub fn get(&self, index: i32) -> Option<&T> {
        self.slots[Self::slot(index)]
            .as_ref()
            .filter(|s| s.world_index() == index)
    }

    /// True when every index in `from..=to` has a valid sample.
    pub fn is_continuous(&self, from: i32, to: i32) -> bool {
        (from..=to).all(|index| self.get(index).is_some())
    }

    pub fn newest_index(&self) -> Option<i32> {
        self.newest
    }

    pub fn latest(&self) -> Option<&T> {
        self.newest.and_then(|index| self.get(index))
    }

    /// No sample newer than `current - horizon`.
    pub fn is_stale(&self, current: i32, horizon: i32) -> bool {
        match self.newest {
            Some(newest) => current - newest > horizon,
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.newest.is_none()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.newest = None;
    }
}
