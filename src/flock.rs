//! The flock lifecycle: enable, tick, disable.
//!
//! A [`Flock`] is either disabled (no backend buffers) or enabled with one
//! [`ActiveScope`] holding the particle, reduction and audio buffers. The
//! buffers are [`BufferHandle`]s, so leaving the enabled state by any path
//! releases them.
//!
//! Each [`Flock::tick`] runs one frame in a fixed order:
//!
//! 1. snapshot the steering config
//! 2. capture the audio spectrum and upload it
//! 3. run the reduction passes (if enabled)
//! 4. run the steering pass
//! 5. hand the particles to the presentation sink
//!
//! A failing step drops the frame; the flock stays enabled.

use glam::Vec3;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::AudioSpectrumSource;
use crate::backend::{BufferHandle, Kernel, SharedBackend};
use crate::config::{FlockConfig, SharedSteering};
use crate::error::{FlockError, Result};
use crate::particle::{ceil_pow2, AudioState, BoidState};
use crate::reduction::{ReductionPipeline, ReductionReport};
use crate::spawn::Spawner;
use crate::steering::{PointerEvent, SteerBuffers, SteeringDispatcher};

/// Consumer of the particle array after each frame's steering pass.
pub trait PresentationSink {
    /// `particles` holds exactly `count` boids.
    fn present(&mut self, particles: &[BoidState], count: u32) -> Result<()>;
}

/// What one successful tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// 1-based index of the frame within the current scope.
    pub frame: u64,
    pub reduction: Option<ReductionReport>,
    pub steer_groups: u32,
}

/// Buffers owned by an enabled flock.
#[derive(Debug)]
pub struct ActiveScope {
    particles: BufferHandle,
    reduction: BufferHandle,
    audio: BufferHandle,
    count: u32,
    frame: u64,
}

impl ActiveScope {
    /// Number of live boids (the particle buffer may be longer).
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn particle_buffer(&self) -> &BufferHandle {
        &self.particles
    }

    pub fn reduction_buffer(&self) -> &BufferHandle {
        &self.reduction
    }

    pub fn audio_buffer(&self) -> &BufferHandle {
        &self.audio
    }

    pub fn frames(&self) -> u64 {
        self.frame
    }
}

enum FlockState {
    Disabled,
    Enabled(ActiveScope),
}

/// Audio-reactive boid flock over a compute backend.
pub struct Flock {
    backend: SharedBackend,
    config: FlockConfig,
    steering: Arc<SharedSteering>,
    audio: Box<dyn AudioSpectrumSource>,
    sink: Option<Box<dyn PresentationSink>>,
    spawner: Spawner,
    reduction: Option<ReductionPipeline>,
    dispatcher: SteeringDispatcher,
    state: FlockState,
}

impl Flock {
    /// Create a disabled flock.
    ///
    /// `config.fft_resolution` must match the audio source's resolution.
    pub fn new(
        backend: SharedBackend,
        config: FlockConfig,
        audio: Box<dyn AudioSpectrumSource>,
    ) -> Result<Self> {
        config.validate()?;
        if audio.resolution() != config.fft_resolution as usize {
            return Err(FlockError::invalid_argument(format!(
                "audio source resolution {} does not match fft_resolution {}",
                audio.resolution(),
                config.fft_resolution
            )));
        }

        let reduction = if config.reduction {
            let [group_x, _, _] = backend.borrow().thread_group_size(Kernel::Reduce);
            if group_x != config.block_size {
                return Err(FlockError::invalid_argument(format!(
                    "block_size {} does not match the backend's reduce group size {}",
                    config.block_size, group_x
                )));
            }
            Some(ReductionPipeline::new(config.block_size)?)
        } else {
            None
        };

        Ok(Self {
            steering: Arc::new(SharedSteering::new(config.steering.clone())),
            spawner: Spawner::new(config.seed, config.fft_resolution),
            dispatcher: SteeringDispatcher::new(config.fft_resolution, config.origin),
            reduction,
            backend,
            config,
            audio,
            sink: None,
            state: FlockState::Disabled,
        })
    }

    /// Send every frame's particles to `sink`.
    pub fn with_sink(mut self, sink: Box<dyn PresentationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Read steering parameters from an externally owned cell.
    pub fn with_shared_steering(mut self, steering: Arc<SharedSteering>) -> Self {
        self.steering = steering;
        self
    }

    /// Handle other threads can use to retune steering between frames.
    pub fn steering(&self) -> Arc<SharedSteering> {
        Arc::clone(&self.steering)
    }

    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    /// Move the flock's owner, which is the default steering target.
    pub fn set_origin(&mut self, origin: Vec3) {
        self.dispatcher.set_origin(origin);
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, FlockState::Enabled(_))
    }

    pub fn scope(&self) -> Option<&ActiveScope> {
        match &self.state {
            FlockState::Enabled(scope) => Some(scope),
            FlockState::Disabled => None,
        }
    }

    /// Spawn the particles and allocate all buffers.
    ///
    /// On failure nothing stays allocated and the flock remains disabled.
    pub fn enable(&mut self) -> Result<()> {
        if self.is_enabled() {
            return Err(FlockError::invalid_state("flock is already enabled"));
        }

        let scope = self.allocate_scope().map_err(|err| match err {
            FlockError::Gpu(gpu) => FlockError::lifecycle(format!("enable failed: {}", gpu)),
            other => other,
        })?;
        info!(
            backend = self.backend.borrow().name(),
            count = scope.count,
            buffer_len = scope.particles.len(),
            "flock enabled"
        );
        self.state = FlockState::Enabled(scope);
        Ok(())
    }

    fn allocate_scope(&self) -> Result<ActiveScope> {
        let boids = self.spawner.initialize(
            self.config.spawn_count(),
            self.config.boid_extent,
            self.config.pattern,
        )?;
        let count = boids.len() as u32;

        let buffer_len = if self.reduction.is_some() {
            ceil_pow2(count)
        } else {
            count
        };
        let particles =
            BufferHandle::allocate(&self.backend, "particles", BoidState::STRIDE, buffer_len as usize)?;
        particles.upload(&boids)?;

        let reduction_len = if self.reduction.is_some() { buffer_len } else { 1 };
        let reduction = BufferHandle::allocate(
            &self.backend,
            "reduction",
            BoidState::STRIDE,
            reduction_len as usize,
        )?;

        let audio = BufferHandle::allocate(
            &self.backend,
            "audio",
            AudioState::STRIDE,
            self.audio.resolution(),
        )?;

        debug!(count, buffer_len, reduction_len, "flock buffers allocated");
        Ok(ActiveScope {
            particles,
            reduction,
            audio,
            count,
            frame: 0,
        })
    }

    /// Release all buffers. Returns false if the flock was already disabled.
    pub fn disable(&mut self) -> bool {
        match std::mem::replace(&mut self.state, FlockState::Disabled) {
            FlockState::Enabled(scope) => {
                info!(frames = scope.frame, "flock disabled");
                drop(scope);
                true
            }
            FlockState::Disabled => false,
        }
    }

    /// Run one frame.
    pub fn tick(&mut self, dt: f32, pointer: Option<PointerEvent>) -> Result<FrameReport> {
        let result = self.run_frame(dt, pointer);
        if let Err(err) = &result {
            warn!(error = %err, "frame dropped");
        }
        result
    }

    fn run_frame(&mut self, dt: f32, pointer: Option<PointerEvent>) -> Result<FrameReport> {
        let Flock {
            backend,
            steering,
            audio,
            sink,
            reduction,
            dispatcher,
            state,
            ..
        } = self;

        let scope = match state {
            FlockState::Enabled(scope) => scope,
            FlockState::Disabled => {
                return Err(FlockError::lifecycle("tick on a disabled flock"));
            }
        };

        let config = steering.snapshot();

        let spectrum = audio.capture(dt)?;
        if spectrum.len() != scope.audio.len() {
            return Err(FlockError::invalid_state(format!(
                "audio source produced {} entries, buffer holds {}",
                spectrum.len(),
                scope.audio.len()
            )));
        }
        scope.audio.upload(spectrum)?;

        let reduction_report = match reduction {
            Some(pipeline) => Some(pipeline.run(
                backend,
                &scope.particles,
                &scope.reduction,
                scope.particles.len() as u32,
            )?),
            None => None,
        };

        let steer_groups = dispatcher.step(
            backend,
            SteerBuffers {
                particles: &scope.particles,
                reduction: &scope.reduction,
                audio: &scope.audio,
            },
            scope.count,
            &config,
            pointer,
            dt,
        )?;

        if let Some(sink) = sink {
            let mut particles = scope.particles.read::<BoidState>()?;
            particles.truncate(scope.count as usize);
            sink.present(&particles, scope.count)?;
        }

        scope.frame += 1;
        Ok(FrameReport {
            frame: scope.frame,
            reduction: reduction_report,
            steer_groups,
        })
    }

    /// Read back the live boids.
    pub fn particles(&self) -> Result<Vec<BoidState>> {
        let scope = self
            .scope()
            .ok_or_else(|| FlockError::lifecycle("particles read on a disabled flock"))?;
        let mut particles = scope.particles.read::<BoidState>()?;
        particles.truncate(scope.count as usize);
        Ok(particles)
    }
}

impl Drop for Flock {
    fn drop(&mut self) {
        self.disable();
    }
}
