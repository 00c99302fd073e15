//! CPU reference implementations of the reduction and steering kernels.
//!
//! The production kernels only exist as opaque compute shaders, so these
//! functions define the math both backends run: a weighted block mean for
//! the reduction, and a standard boids blend (separation from the flock
//! centroid, alignment with the mean heading, seeking the target) for the
//! steering pass. `gpu::shaders` contains the WGSL translation.

use glam::Vec3;

use crate::error::{FlockError, Result};
use crate::particle::{AudioState, BoidState};
use crate::uniforms::{names, UniformSet};

/// Scalars and vectors consumed by the steering kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SteerParams {
    pub delta_time: f32,
    pub num_particles: u32,
    pub fft_resolution: u32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub target_weight: f32,
    pub move_speed: f32,
    pub target_position: Vec3,
    pub tap_position: Vec3,
    pub is_tapped: bool,
}

impl SteerParams {
    /// Read every steering uniform out of `set`.
    pub fn from_uniforms(set: &UniformSet) -> Result<Self> {
        Ok(Self {
            delta_time: f32_of(set, names::DELTA_TIME)?,
            num_particles: u32_of(set, names::NUM_PARTICLES)?,
            fft_resolution: u32_of(set, names::FFT_RESOLUTION)?,
            separation_weight: f32_of(set, names::SEPARATION_WEIGHT)?,
            alignment_weight: f32_of(set, names::ALIGNMENT_WEIGHT)?,
            target_weight: f32_of(set, names::TARGET_WEIGHT)?,
            move_speed: f32_of(set, names::MOVE_SPEED)?,
            target_position: vec3_of(set, names::TARGET_POSITION)?,
            tap_position: vec3_of(set, names::TAP_POSITION)?,
            is_tapped: set
                .get(names::IS_TAPPED)
                .and_then(|v| v.as_bool())
                .ok_or_else(|| missing(names::IS_TAPPED))?,
        })
    }
}

fn missing(name: &str) -> FlockError {
    FlockError::lifecycle(format!("uniform '{}' was never set", name))
}

fn f32_of(set: &UniformSet, name: &str) -> Result<f32> {
    set.get(name).and_then(|v| v.as_f32()).ok_or_else(|| missing(name))
}

fn u32_of(set: &UniformSet, name: &str) -> Result<u32> {
    set.get(name).and_then(|v| v.as_u32()).ok_or_else(|| missing(name))
}

fn vec3_of(set: &UniformSet, name: &str) -> Result<Vec3> {
    set.get(name).and_then(|v| v.as_vec3()).ok_or_else(|| missing(name))
}

/// Coarse description of the whole flock.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlockSummary {
    pub centroid: Vec3,
    pub heading: Vec3,
    /// Number of boids the summary covers.
    pub count: f32,
}

/// Reduce one block into a single aggregate entry.
///
/// On pass 0 every input is a boid and weighs 1, except zero-sized padding
/// entries which weigh nothing. On later passes inputs are aggregates and
/// weigh their `size` (the number of boids they cover).
pub fn reduce_block(block: &[BoidState], pass_index: u32) -> BoidState {
    let mut weight = 0.0;
    let mut position = Vec3::ZERO;
    let mut forward = Vec3::ZERO;
    for b in block {
        let w = match pass_index {
            0 if b.size > 0.0 => 1.0,
            0 => 0.0,
            _ => b.size,
        };
        weight += w;
        position += b.position * w;
        forward += b.forward * w;
    }

    let mut out = BoidState::default();
    if weight > 0.0 {
        out.position = position / weight;
        out.forward = forward / weight;
    }
    out.size = weight;
    out
}

/// Combine the leading reduction entries into a flock summary.
///
/// Entries are consumed until they cover `num_particles` boids. A zero
/// first entry means no reduction has run, in which case the particles are
/// averaged directly.
pub fn flock_summary(
    reduction: &[BoidState],
    particles: &[BoidState],
    num_particles: u32,
) -> FlockSummary {
    let target = num_particles as f32;
    let mut summary = FlockSummary::default();

    if reduction.first().is_some_and(|r| r.size > 0.0) {
        for r in reduction {
            if summary.count >= target || r.size <= 0.0 {
                break;
            }
            summary.count += r.size;
            summary.centroid += r.position * r.size;
            summary.heading += r.forward * r.size;
        }
    } else {
        for p in particles.iter().take(num_particles as usize) {
            summary.count += 1.0;
            summary.centroid += p.position;
            summary.heading += p.forward;
        }
    }

    if summary.count > 0.0 {
        summary.centroid /= summary.count;
        summary.heading /= summary.count;
    }
    summary
}

/// Advance one boid by `params.delta_time`.
pub fn steer(
    boid: &BoidState,
    index: u32,
    params: &SteerParams,
    summary: &FlockSummary,
    audio: &[AudioState],
) -> BoidState {
    let amplitude = if params.fft_resolution > 0 && !audio.is_empty() {
        let bin = (index % params.fft_resolution) as usize;
        audio.get(bin).map_or(0.0, |a| a.amplitude)
    } else {
        0.0
    };

    let separation = (boid.position - summary.centroid).normalize_or_zero();
    let alignment = summary.heading.normalize_or_zero();
    let seek = (params.target_position - boid.position).normalize_or_zero();
    let tap = if params.is_tapped {
        (boid.position - params.tap_position).normalize_or_zero()
    } else {
        Vec3::ZERO
    };

    let steering = separation * params.separation_weight
        + alignment * params.alignment_weight
        + seek * params.target_weight
        + tap;
    let forward = (boid.forward + steering * params.delta_time)
        .try_normalize()
        .unwrap_or(boid.forward);

    let mut out = *boid;
    out.forward = forward;
    out.position += forward * params.move_speed * (1.0 + amplitude) * params.delta_time;
    out.color = Vec3::new(
        amplitude.min(1.0),
        forward.y * 0.5 + 0.5,
        forward.z * 0.5 + 0.5,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boid(position: Vec3, forward: Vec3) -> BoidState {
        BoidState::new(position, forward, 0.05)
    }

    #[test]
    fn test_reduce_block_first_pass_counts_boids() {
        let block = [
            boid(Vec3::new(1.0, 0.0, 0.0), Vec3::X),
            boid(Vec3::new(3.0, 0.0, 0.0), Vec3::X),
        ];
        let out = reduce_block(&block, 0);
        assert_eq!(out.size, 2.0);
        assert_eq!(out.position, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(out.forward, Vec3::X);
    }

    #[test]
    fn test_reduce_block_skips_padding() {
        let block = [
            boid(Vec3::new(2.0, 0.0, 0.0), Vec3::X),
            BoidState::default(),
            BoidState::default(),
        ];
        let out = reduce_block(&block, 0);
        assert_eq!(out.size, 1.0);
        assert_eq!(out.position, Vec3::new(2.0, 0.0, 0.0));

        let empty = reduce_block(&[BoidState::default(); 4], 0);
        assert_eq!(empty, BoidState::default());
    }

    #[test]
    fn test_reduce_block_later_pass_weights_by_size() {
        let mut a = boid(Vec3::ZERO, Vec3::ZERO);
        a.size = 3.0;
        let mut b = boid(Vec3::new(4.0, 0.0, 0.0), Vec3::ZERO);
        b.size = 1.0;
        let out = reduce_block(&[a, b], 1);
        assert_eq!(out.size, 4.0);
        assert_eq!(out.position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_summary_falls_back_to_particles() {
        let particles = [
            boid(Vec3::new(-1.0, 0.0, 0.0), Vec3::Z),
            boid(Vec3::new(1.0, 2.0, 0.0), Vec3::Z),
        ];
        let reduction = [BoidState::default(); 2];
        let s = flock_summary(&reduction, &particles, 2);
        assert_eq!(s.count, 2.0);
        assert_eq!(s.centroid, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(s.heading, Vec3::Z);
    }

    #[test]
    fn test_summary_stops_after_covering_all_boids() {
        let mut first = boid(Vec3::ONE, Vec3::X);
        first.size = 4.0;
        // Stale entry past the covered range must be ignored.
        let mut stale = boid(Vec3::splat(100.0), Vec3::Y);
        stale.size = 4.0;
        let s = flock_summary(&[first, stale], &[], 4);
        assert_eq!(s.count, 4.0);
        assert_eq!(s.centroid, Vec3::ONE);
    }

    #[test]
    fn test_steer_is_noop_under_zero_configuration() {
        let b = boid(Vec3::new(1.0, 2.0, 3.0), Vec3::Z);
        let params = SteerParams {
            delta_time: 0.016,
            num_particles: 1,
            fft_resolution: 4,
            ..SteerParams::default()
        };
        let audio = [AudioState { amplitude: 0.9, frequency_bucket: 1 }; 4];
        let out = steer(&b, 0, &params, &FlockSummary::default(), &audio);
        assert_eq!(out.position, b.position);
        assert_eq!(out.forward, b.forward);
    }

    #[test]
    fn test_steer_moves_along_forward_scaled_by_audio() {
        let b = boid(Vec3::ZERO, Vec3::Z);
        let params = SteerParams {
            delta_time: 0.5,
            num_particles: 1,
            fft_resolution: 2,
            move_speed: 2.0,
            ..SteerParams::default()
        };
        let audio = [
            AudioState { amplitude: 0.0, frequency_bucket: 0 },
            AudioState { amplitude: 1.0, frequency_bucket: 0 },
        ];
        let quiet = steer(&b, 0, &params, &FlockSummary::default(), &audio);
        let loud = steer(&b, 1, &params, &FlockSummary::default(), &audio);
        assert!((quiet.position.z - 1.0).abs() < 1e-6);
        assert!((loud.position.z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_steer_turns_toward_target() {
        let b = boid(Vec3::ZERO, Vec3::Z);
        let params = SteerParams {
            delta_time: 0.1,
            num_particles: 1,
            target_weight: 1.0,
            target_position: Vec3::new(10.0, 0.0, 0.0),
            ..SteerParams::default()
        };
        let out = steer(&b, 0, &params, &FlockSummary::default(), &[]);
        assert!(out.forward.x > 0.0);
        assert!((out.forward.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tap_pushes_away() {
        let b = boid(Vec3::new(1.0, 0.0, 0.0), Vec3::Z);
        let params = SteerParams {
            delta_time: 0.1,
            num_particles: 1,
            is_tapped: true,
            tap_position: Vec3::ZERO,
            ..SteerParams::default()
        };
        let out = steer(&b, 0, &params, &FlockSummary::default(), &[]);
        assert!(out.forward.x > 0.0);
    }
}
