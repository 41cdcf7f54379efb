//! Shared primitive types used across the incident engine.

use serde::{Deserialize, Serialize};

/// An engine tick. Twenty ticks make one second of game time.
pub type Tick = u64;

/// A stable identity for any actor (player) the engine tracks.
pub type ActorId = String;

/// Opaque token for a chase session.
pub type SessionId = String;

/// The canonical run identifier.
pub type RunId = String;

/// A point inside a named spatial context (a world / dimension).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self { world: world.into(), x, y, z }
    }

    pub fn same_context(&self, other: &Position) -> bool {
        self.world == other.world
    }

    /// Straight-line distance, ignoring the world component.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance when both points share a context, infinity otherwise.
    pub fn separation(&self, other: &Position) -> f64 {
        if self.same_context(other) {
            self.distance_to(other)
        } else {
            f64::INFINITY
        }
    }
}
