//! Flock configuration.
//!
//! [`FlockConfig`] fixes everything that shapes the buffers allocated at
//! enable time (particle count, spawn pattern, block size, spectrum
//! resolution). [`SteeringConfig`] holds the weights the steering pass reads
//! every frame; wrap it in a [`SharedSteering`] to let UI or control code
//! replace it from another thread between frames.
//!
//! Both types round-trip through JSON:
//!
//! ```ignore
//! let config = FlockConfig::new()
//!     .with_particle_count(4096)
//!     .with_pattern(SpawnPattern::ring());
//! config.save("flock.json")?;
//! let loaded = FlockConfig::load("flock.json")?;
//! ```

use arc_swap::ArcSwap;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::audio::DEFAULT_FFT_RESOLUTION;
use crate::error::{ConfigError, FlockError, Result};
use crate::particle::ceil_pow2;
use crate::spawn::{SpawnPattern, DEFAULT_SEED};

/// Block size used by the reduction stage when none is configured.
pub const DEFAULT_BLOCK_SIZE: u32 = 32;

fn default_move_speed() -> f32 {
    1.0
}

fn default_weight() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

/// Per-frame steering parameters.
///
/// Weights are expected in `[0, 1]` but are not clamped here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SteeringConfig {
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    #[serde(default = "default_weight")]
    pub separation_weight: f32,
    #[serde(default = "default_weight")]
    pub alignment_weight: f32,
    #[serde(default = "default_weight")]
    pub target_weight: f32,
    /// Explicit steering target. `None` seeks the flock's own origin.
    #[serde(default)]
    pub target: Option<Vec3>,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            move_speed: default_move_speed(),
            separation_weight: default_weight(),
            alignment_weight: default_weight(),
            target_weight: default_weight(),
            target: None,
        }
    }
}

impl SteeringConfig {
    /// All weights and speed zero. Steering leaves positions untouched.
    pub fn still() -> Self {
        Self {
            move_speed: 0.0,
            separation_weight: 0.0,
            alignment_weight: 0.0,
            target_weight: 0.0,
            target: None,
        }
    }

    pub fn with_move_speed(mut self, speed: f32) -> Self {
        self.move_speed = speed;
        self
    }

    pub fn with_weights(mut self, separation: f32, alignment: f32, target: f32) -> Self {
        self.separation_weight = separation;
        self.alignment_weight = alignment;
        self.target_weight = target;
        self
    }

    pub fn with_target(mut self, target: Vec3) -> Self {
        self.target = Some(target);
        self
    }

    /// The explicit target, or `origin` if none is set.
    pub fn target_or(&self, origin: Vec3) -> Vec3 {
        self.target.unwrap_or(origin)
    }
}

/// Steering config shared with other threads.
///
/// Writers replace the whole config; the flock takes one snapshot per frame,
/// so a frame never sees half of an update.
#[derive(Debug, Default)]
pub struct SharedSteering {
    inner: ArcSwap<SteeringConfig>,
}

impl SharedSteering {
    pub fn new(config: SteeringConfig) -> Self {
        Self {
            inner: ArcSwap::from_pointee(config),
        }
    }

    /// Current config.
    pub fn snapshot(&self) -> Arc<SteeringConfig> {
        self.inner.load_full()
    }

    /// Replace the config.
    pub fn store(&self, config: SteeringConfig) {
        self.inner.store(Arc::new(config));
    }

    /// Apply `f` to a copy of the current config and publish the result.
    pub fn update(&self, f: impl Fn(&mut SteeringConfig)) {
        self.inner.rcu(|current| {
            let mut next = SteeringConfig::clone(current);
            f(&mut next);
            next
        });
    }
}

/// Everything needed to enable a flock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlockConfig {
    pub particle_count: u32,
    /// Per-axis half-extent of [`SpawnPattern::Random`] layouts.
    pub boid_extent: Vec3,
    #[serde(default)]
    pub pattern: SpawnPattern,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Reduction block size (power of two, at least 2).
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Spectrum entries per frame (power of two).
    #[serde(default = "default_fft_resolution")]
    pub fft_resolution: u32,
    /// Run the reduction stage before steering.
    #[serde(default = "default_true")]
    pub reduction: bool,
    /// With reduction on, spawn `ceil_pow2(particle_count)` live boids
    /// instead of padding the buffer with zero-sized entries.
    #[serde(default = "default_true")]
    pub pad_with_boids: bool,
    /// Owner position, used as the steering target when none is set.
    #[serde(default)]
    pub origin: Vec3,
    #[serde(default)]
    pub steering: SteeringConfig,
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}

fn default_fft_resolution() -> u32 {
    DEFAULT_FFT_RESOLUTION
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            particle_count: 1024,
            boid_extent: Vec3::splat(10.0),
            pattern: SpawnPattern::Random,
            seed: DEFAULT_SEED,
            block_size: DEFAULT_BLOCK_SIZE,
            fft_resolution: DEFAULT_FFT_RESOLUTION,
            reduction: true,
            pad_with_boids: true,
            origin: Vec3::ZERO,
            steering: SteeringConfig::default(),
        }
    }
}

impl FlockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_particle_count(mut self, count: u32) -> Self {
        self.particle_count = count;
        self
    }

    pub fn with_extent(mut self, extent: Vec3) -> Self {
        self.boid_extent = extent;
        self
    }

    pub fn with_pattern(mut self, pattern: SpawnPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_fft_resolution(mut self, resolution: u32) -> Self {
        self.fft_resolution = resolution;
        self
    }

    pub fn with_reduction(mut self, enabled: bool) -> Self {
        self.reduction = enabled;
        self
    }

    pub fn with_pad_with_boids(mut self, enabled: bool) -> Self {
        self.pad_with_boids = enabled;
        self
    }

    /// Number of boids to spawn: the rounded count when the reduction
    /// stage fills the power-of-two buffer with live boids.
    pub fn spawn_count(&self) -> u32 {
        if self.reduction && self.pad_with_boids {
            ceil_pow2(self.particle_count)
        } else {
            self.particle_count
        }
    }

    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_steering(mut self, steering: SteeringConfig) -> Self {
        self.steering = steering;
        self
    }

    /// Check the invariants the buffers depend on.
    pub fn validate(&self) -> Result<()> {
        if self.particle_count == 0 {
            return Err(FlockError::invalid_argument("particle_count must be > 0"));
        }
        if self.block_size < 2 || !self.block_size.is_power_of_two() {
            return Err(FlockError::invalid_argument(format!(
                "block_size must be a power of two >= 2, got {}",
                self.block_size
            )));
        }
        if self.fft_resolution == 0 || !self.fft_resolution.is_power_of_two() {
            return Err(FlockError::invalid_argument(format!(
                "fft_resolution must be a power of two, got {}",
                self.fft_resolution
            )));
        }
        if self.reduction && self.particle_count > 1 << 31 {
            return Err(FlockError::invalid_argument(format!(
                "particle_count {} has no u32 power of two to round up to",
                self.particle_count
            )));
        }
        if self.pattern.spawned_count(self.spawn_count()) == 0 {
            return Err(FlockError::invalid_argument(
                "spawn pattern produces no particles for this count",
            ));
        }
        Ok(())
    }

    /// Save the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> std::result::Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let steering = SteeringConfig::default();
        assert_eq!(steering.move_speed, 1.0);
        assert_eq!(steering.separation_weight, 0.5);
        assert_eq!(steering.target_or(Vec3::ONE), Vec3::ONE);

        let config = FlockConfig::default();
        assert_eq!(config.block_size, 32);
        assert_eq!(config.fft_resolution, 1024);
        assert_eq!(config.seed, 256);
        assert!(config.pad_with_boids);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_spawn_count_rounds_only_with_live_padding() {
        let config = FlockConfig::new().with_particle_count(1000);
        assert_eq!(config.spawn_count(), 1024);
        assert_eq!(config.clone().with_pad_with_boids(false).spawn_count(), 1000);
        assert_eq!(config.with_reduction(false).spawn_count(), 1000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            FlockConfig::new().with_particle_count(0),
            FlockConfig::new().with_block_size(1),
            FlockConfig::new().with_block_size(24),
            FlockConfig::new().with_fft_resolution(1000),
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(FlockError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_json_round_trip_and_defaults() {
        let config = FlockConfig::new()
            .with_particle_count(360)
            .with_pattern(SpawnPattern::Ring { radius: 2.5 })
            .with_steering(SteeringConfig::default().with_target(Vec3::X));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(FlockConfig::from_json(&json).unwrap(), config);

        let minimal = r#"{ "particle_count": 64, "boid_extent": [1.0, 2.0, 3.0] }"#;
        let parsed = FlockConfig::from_json(minimal).unwrap();
        assert_eq!(parsed.boid_extent, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(parsed.steering, SteeringConfig::default());
        assert!(parsed.reduction);
        assert!(parsed.pad_with_boids);
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"{ "particle_count": 0, "boid_extent": [1.0, 1.0, 1.0] }"#;
        assert!(matches!(
            FlockConfig::from_json(json),
            Err(ConfigError::Invalid(FlockError::InvalidArgument(_)))
        ));
        assert!(matches!(
            FlockConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_shared_steering_snapshot_is_stable() {
        let shared = SharedSteering::new(SteeringConfig::default());
        let before = shared.snapshot();
        shared.update(|c| c.move_speed = 3.0);
        assert_eq!(before.move_speed, 1.0);
        assert_eq!(shared.snapshot().move_speed, 3.0);

        shared.store(SteeringConfig::still());
        assert_eq!(*shared.snapshot(), SteeringConfig::still());
    }

    #[test]
    fn test_shared_steering_across_threads() {
        let shared = Arc::new(SharedSteering::default());
        let writer = Arc::clone(&shared);
        std::thread::spawn(move || writer.update(|c| c.target = Some(Vec3::Y)))
            .join()
            .unwrap();
        assert_eq!(shared.snapshot().target, Some(Vec3::Y));
    }
}
