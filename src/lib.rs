//! # Spectroid - audio-reactive compute flocking
//!
//! A flock of boids steered by compute kernels and driven by the spectrum
//! of an audio clip.
//!
//! Spectroid owns the host side of the simulation: spawning the initial
//! boids, allocating backend buffers, running a multi-pass reduction that
//! summarizes the flock, and dispatching one steering pass per frame. The
//! kernels themselves run on a [`ComputeBackend`]: a wgpu device for real
//! runs, or the CPU reference backend for tests and headless tools.
//!
//! ## Quick Start
//!
//! ```ignore
//! use spectroid::prelude::*;
//!
//! let backend: SharedBackend = Rc::new(RefCell::new(CpuBackend::new(32)));
//! let config = FlockConfig::new()
//!     .with_particle_count(1024)
//!     .with_pattern(SpawnPattern::ring());
//!
//! let mut analyzer = SpectrumAnalyzer::new(config.fft_resolution)?;
//! analyzer.bind_clip(AudioClip::sine(220.0, 48_000, 4.0, 0.5))?;
//!
//! let mut flock = Flock::new(backend, config, Box::new(analyzer))?;
//! flock.enable()?;
//! for _ in 0..60 {
//!     flock.tick(1.0 / 60.0, None)?;
//! }
//! flock.disable();
//! ```
//!
//! ## Core Concepts
//!
//! ### Boids
//!
//! Every boid is a [`BoidState`]: position, unit forward direction, color,
//! size and the parameters its spawn pattern left behind. The layout is
//! shared byte-for-byte with the WGSL kernels.
//!
//! ### Frames
//!
//! [`Flock::tick`] runs one frame: capture the audio spectrum, reduce the
//! flock to a centroid and mean heading, steer every boid, then hand the
//! result to an optional [`PresentationSink`].
//!
//! ### Steering
//!
//! Steering weights live in a [`SharedSteering`] cell. Any thread may store
//! a new [`SteeringConfig`]; the flock snapshots it once per frame.

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod flock;
pub mod gpu;
pub mod input;
pub mod kernels;
pub mod particle;
pub mod reduction;
pub mod spawn;
pub mod steering;
pub mod time;
pub mod uniforms;

pub use bytemuck;
pub use glam::{Vec2, Vec3};

pub use audio::{AudioClip, AudioSpectrumSource, SilentSpectrum, SpectrumAnalyzer};
pub use backend::{BufferHandle, ComputeBackend, CpuBackend, Kernel, SharedBackend};
pub use config::{FlockConfig, SharedSteering, SteeringConfig};
pub use error::{ConfigError, FlockError, GpuError, Result};
pub use flock::{Flock, FrameReport, PresentationSink};
pub use gpu::WgpuBackend;
pub use input::{PointerInput, ScreenProjection};
pub use particle::{AudioState, BoidState};
pub use reduction::{ReductionPipeline, ReductionReport};
pub use spawn::{SpawnPattern, Spawner};
pub use steering::PointerEvent;
pub use time::FrameClock;
pub use uniforms::UniformValue;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use spectroid::prelude::*;
/// ```
pub mod prelude {
    pub use crate::audio::{AudioClip, AudioSpectrumSource, SilentSpectrum, SpectrumAnalyzer};
    pub use crate::backend::{ComputeBackend, CpuBackend, SharedBackend};
    pub use crate::config::{FlockConfig, SharedSteering, SteeringConfig};
    pub use crate::error::{FlockError, Result};
    pub use crate::flock::{Flock, FrameReport, PresentationSink};
    pub use crate::gpu::WgpuBackend;
    pub use crate::input::{MouseButton, PointerInput, ScreenProjection};
    pub use crate::particle::BoidState;
    pub use crate::spawn::SpawnPattern;
    pub use crate::steering::PointerEvent;
    pub use crate::time::FrameClock;
    pub use glam::{Vec2, Vec3};
    pub use std::cell::RefCell;
    pub use std::rc::Rc;
}
