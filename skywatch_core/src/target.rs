//! Targets and the immutable snapshots handed out by the engine.

use nalgebra::Vector2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a simulated target.
///
/// Drawn from the engine's RNG as a random (v4) UUID, so identifiers are
/// never reused across restarts yet stay reproducible under a fixed seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(pub Uuid);

impl TargetId {
    /// Creates a TargetId from random bytes drawn from `rng`.
    pub fn from_rng<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(uuid::Builder::from_random_bytes(rng.gen()).into_uuid())
    }

    /// Creates a deterministic TargetId from a seed (for tests and fixtures).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "t_{}", &self.0.to_string()[..8])
    }
}

/// A moving target inside the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,

    /// Position in arena units, within `[0, area_size]`
    pub x: f64,
    pub y: f64,

    /// Degrees in `[0, 360)`; 0° points along +x, angles grow toward +y
    pub heading: f64,

    /// Units per second, fixed at creation
    pub speed: f64,
}

impl Target {
    pub fn new(id: TargetId, x: f64, y: f64, heading: f64, speed: f64) -> Self {
        Self {
            id,
            x,
            y,
            heading: normalize_heading(heading),
            speed,
        }
    }

    /// Position as a vector.
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Unit vector along the heading.
    pub fn direction(&self) -> Vector2<f64> {
        let rad = self.heading.to_radians();
        Vector2::new(rad.cos(), rad.sin())
    }
}

/// Wraps an angle in degrees into `[0, 360)`.
pub fn normalize_heading(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// An immutable copy of all targets at one tick.
///
/// Cloning is cheap; the target list is shared, never mutated after the
/// tick that produced it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Engine tick that produced the targets
    pub tick: u64,

    /// Context time at which the snapshot was taken
    pub taken_at: Duration,

    targets: Arc<Vec<Target>>,
}

impl Snapshot {
    pub fn new(tick: u64, taken_at: Duration, targets: Arc<Vec<Target>>) -> Self {
        Self {
            tick,
            taken_at,
            targets,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, id: TargetId) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }
}
