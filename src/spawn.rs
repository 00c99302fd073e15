//! Initial particle layouts.
//!
//! A [`Spawner`] turns a particle count, a bounding half-extent and a
//! [`SpawnPattern`] into the boid array uploaded when a flock is enabled.
//! Random layouts draw from a [`SpawnContext`] seeded explicitly, so two
//! spawns with the same seed are identical.

use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

use crate::error::{FlockError, Result};
use crate::particle::BoidState;

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 256;

/// Canonical heading rotated by the random initializer.
pub const CANONICAL_FORWARD: Vec3 = Vec3::Z;

pub const RANDOM_BOID_SIZE: f32 = 0.05;
pub const RING_BOID_SIZE: f32 = 0.1;
pub const GRID_BOID_SIZE: f32 = 0.1;
pub const DEFAULT_RING_RADIUS: f32 = 4.0;
pub const DEFAULT_GRID_SPACING: f32 = 0.125;

/// How particles are laid out at enable time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpawnPattern {
    /// Uniform inside the bounds, random headings.
    Random,
    /// Evenly stepped around a circle in the XY plane.
    Ring { radius: f32 },
    /// Square lattice in the XY plane starting at the origin.
    Grid { spacing: f32 },
}

impl Default for SpawnPattern {
    fn default() -> Self {
        SpawnPattern::Random
    }
}

impl SpawnPattern {
    pub fn ring() -> Self {
        SpawnPattern::Ring { radius: DEFAULT_RING_RADIUS }
    }

    pub fn grid() -> Self {
        SpawnPattern::Grid { spacing: DEFAULT_GRID_SPACING }
    }

    /// Number of particles this pattern produces for `count` requested.
    ///
    /// Grids keep only the largest square that fits.
    pub fn spawned_count(&self, count: u32) -> u32 {
        match self {
            SpawnPattern::Grid { .. } => {
                let side = grid_side(count);
                side * side
            }
            _ => count,
        }
    }
}

fn grid_side(count: u32) -> u32 {
    (count as f64).sqrt().floor() as u32
}

/// Builds initial boid arrays.
#[derive(Clone, Copy, Debug)]
pub struct Spawner {
    seed: u64,
    audio_resolution: u32,
}

impl Default for Spawner {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            audio_resolution: crate::audio::DEFAULT_FFT_RESOLUTION,
        }
    }
}

impl Spawner {
    /// `audio_resolution` sets the angular step of ring layouts.
    pub fn new(seed: u64, audio_resolution: u32) -> Self {
        Self { seed, audio_resolution }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Lay out `count` boids.
    ///
    /// `bounds` is the per-axis half-extent used by [`SpawnPattern::Random`].
    pub fn initialize(&self, count: u32, bounds: Vec3, pattern: SpawnPattern) -> Result<Vec<BoidState>> {
        if count == 0 {
            return Err(FlockError::invalid_argument("particle count must be > 0"));
        }

        let boids = match pattern {
            SpawnPattern::Random => {
                if !bounds.is_finite() || bounds.min_element() < 0.0 {
                    return Err(FlockError::invalid_argument(format!(
                        "bounds must be finite and non-negative, got {}",
                        bounds
                    )));
                }
                let mut ctx = SpawnContext::new(count, self.seed);
                (0..count)
                    .map(|_| {
                        let position = ctx.random_in_box(bounds);
                        let forward = ctx.random_rotation() * CANONICAL_FORWARD;
                        BoidState::new(position, forward, RANDOM_BOID_SIZE)
                    })
                    .collect()
            }
            SpawnPattern::Ring { radius } => {
                let step = count
                    .checked_div(self.audio_resolution)
                    .unwrap_or(count)
                    .max(1) as f32;
                (0..count)
                    .map(|i| {
                        let radians = (i as f32 / step) * PI / 180.0;
                        let position = Vec3::new(radius * radians.cos(), radius * radians.sin(), 0.0);
                        let mut boid = BoidState::new(position, Vec3::ZERO, RING_BOID_SIZE);
                        boid.angle = Vec3::new((i % 360) as f32, radians, 0.0);
                        boid.original_position = position;
                        boid.radius = radius;
                        boid
                    })
                    .collect()
            }
            SpawnPattern::Grid { spacing } => {
                let side = grid_side(count);
                (0..side * side)
                    .map(|i| {
                        let position = Vec3::new(
                            (i % side) as f32 * spacing,
                            (i / side) as f32 * spacing,
                            0.0,
                        );
                        BoidState::new(position, Vec3::ZERO, GRID_BOID_SIZE)
                    })
                    .collect()
            }
        };
        Ok(boids)
    }
}

/// Seeded random helpers used while spawning.
pub struct SpawnContext {
    /// Total number of particles being spawned.
    pub count: u32,
    rng: StdRng,
}

impl SpawnContext {
    pub fn new(count: u32, seed: u64) -> Self {
        Self {
            count,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Random f32 between 0.0 and 1.0.
    #[inline]
    pub fn random(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Random f32 in `[min, max]`.
    #[inline]
    pub fn random_range(&mut self, min: f32, max: f32) -> f32 {
        self.rng.gen_range(min..=max)
    }

    /// Random point in the axis-aligned box `[-half_extent, +half_extent]`.
    pub fn random_in_box(&mut self, half_extent: Vec3) -> Vec3 {
        Vec3::new(
            self.random_range(-half_extent.x, half_extent.x),
            self.random_range(-half_extent.y, half_extent.y),
            self.random_range(-half_extent.z, half_extent.z),
        )
    }

    /// Uniformly distributed random rotation (Shoemake's method).
    pub fn random_rotation(&mut self) -> Quat {
        let u1 = self.random();
        let u2 = self.random() * TAU;
        let u3 = self.random() * TAU;
        let a = (1.0 - u1).sqrt();
        let b = u1.sqrt();
        Quat::from_xyzw(a * u2.sin(), a * u2.cos(), b * u3.sin(), b * u3.cos()).normalize()
    }

    /// Random unit vector.
    pub fn random_direction(&mut self) -> Vec3 {
        self.random_rotation() * CANONICAL_FORWARD
    }
}
