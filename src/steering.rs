//! Per-particle steering pass.

use glam::Vec3;
use tracing::trace;

use crate::backend::{bindings, BufferHandle, Kernel, SharedBackend};
use crate::config::SteeringConfig;
use crate::error::{FlockError, Result};
use crate::uniforms::{names, UniformValue};

/// A pointer sample in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointerEvent {
    pub world_position: Vec3,
    /// True only on the frame the pointer went down.
    pub tapped: bool,
}

impl PointerEvent {
    pub fn tap(world_position: Vec3) -> Self {
        Self {
            world_position,
            tapped: true,
        }
    }
}

/// The three buffers the steering kernel binds.
#[derive(Clone, Copy, Debug)]
pub struct SteerBuffers<'a> {
    pub particles: &'a BufferHandle,
    pub reduction: &'a BufferHandle,
    pub audio: &'a BufferHandle,
}

/// Pushes steering uniforms and dispatches the steer kernel.
#[derive(Clone, Copy, Debug)]
pub struct SteeringDispatcher {
    fft_resolution: u32,
    origin: Vec3,
}

impl SteeringDispatcher {
    /// `origin` is the target used when the config names none.
    pub fn new(fft_resolution: u32, origin: Vec3) -> Self {
        Self {
            fft_resolution,
            origin,
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    /// Advance `count` particles by `dt` seconds in place.
    ///
    /// Returns the number of work-groups dispatched. That is
    /// `count.div_ceil(group_size)`, not `count / group_size`: a count that
    /// is not a multiple of the group size still steers its tail, and the
    /// kernel drops invocations at or past `numParticles`.
    pub fn step(
        &self,
        backend: &SharedBackend,
        buffers: SteerBuffers<'_>,
        count: u32,
        config: &SteeringConfig,
        pointer: Option<PointerEvent>,
        dt: f32,
    ) -> Result<u32> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(FlockError::invalid_argument(format!(
                "delta time must be finite and non-negative, got {}",
                dt
            )));
        }
        if count as usize > buffers.particles.len() {
            return Err(FlockError::invalid_argument(format!(
                "{} particles do not fit buffer '{}' of {}",
                count,
                buffers.particles.label(),
                buffers.particles.len()
            )));
        }

        let pointer = pointer.unwrap_or_default();
        let mut backend = backend.borrow_mut();

        let uniforms: [(&str, UniformValue); 10] = [
            (names::DELTA_TIME, dt.into()),
            (names::NUM_PARTICLES, count.into()),
            (names::FFT_RESOLUTION, self.fft_resolution.into()),
            (names::SEPARATION_WEIGHT, config.separation_weight.into()),
            (names::ALIGNMENT_WEIGHT, config.alignment_weight.into()),
            (names::TARGET_WEIGHT, config.target_weight.into()),
            (names::MOVE_SPEED, config.move_speed.into()),
            (names::TARGET_POSITION, config.target_or(self.origin).into()),
            (names::TAP_POSITION, pointer.world_position.into()),
            (names::IS_TAPPED, pointer.tapped.into()),
        ];
        for (name, value) in uniforms {
            backend.set_uniform(Kernel::Steer, name, value)?;
        }

        backend.set_buffer(Kernel::Steer, bindings::PARTICLE_BUFFER, buffers.particles.id())?;
        backend.set_buffer(Kernel::Steer, bindings::REDUCTION_BUFFER, buffers.reduction.id())?;
        backend.set_buffer(Kernel::Steer, bindings::AUDIO_BUFFER, buffers.audio.id())?;

        let [group_x, _, _] = backend.thread_group_size(Kernel::Steer);
        let groups = count.div_ceil(group_x.max(1));
        backend.dispatch(Kernel::Steer, [groups, 1, 1])?;
        trace!(count, groups, tapped = pointer.tapped, "steering pass");
        Ok(groups)
    }
}
