//! End-to-end flock tests on the CPU backend.
//!
//! These drive the public API the way an application would: build a config,
//! enable, tick, inspect the particles and the recorded dispatches.

use std::cell::RefCell;
use std::f32::consts::PI;
use std::rc::Rc;

use glam::Vec3;
use proptest::prelude::*;

use spectroid::backend::{bindings, ComputeBackend, CpuBackend, Kernel};
use spectroid::uniforms::names;
use spectroid::{
    AudioClip, AudioSpectrumSource, AudioState, BoidState, Flock, FlockConfig, FlockError,
    PointerEvent, PresentationSink, SilentSpectrum, SpawnPattern, Spawner, SpectrumAnalyzer,
    SteeringConfig,
};

// ============================================================================
// Helpers
// ============================================================================

fn cpu_flock(config: FlockConfig) -> (Rc<RefCell<CpuBackend>>, Flock) {
    let cpu = Rc::new(RefCell::new(CpuBackend::new(config.block_size)));
    let audio = Box::new(SilentSpectrum::new(config.fft_resolution as usize));
    let flock = Flock::new(cpu.clone(), config, audio).unwrap();
    (cpu, flock)
}

/// Records what every frame presented.
#[derive(Clone, Default)]
struct RecordingSink {
    frames: Rc<RefCell<Vec<(usize, u32)>>>,
}

impl PresentationSink for RecordingSink {
    fn present(&mut self, particles: &[BoidState], count: u32) -> spectroid::Result<()> {
        self.frames.borrow_mut().push((particles.len(), count));
        Ok(())
    }
}

// ============================================================================
// Spawning
// ============================================================================

#[test]
fn test_random_spawn_stays_in_bounds() {
    let bounds = Vec3::new(10.0, 10.0, 10.0);
    let (_cpu, mut flock) = cpu_flock(
        FlockConfig::new()
            .with_particle_count(64)
            .with_extent(bounds)
            .with_seed(256),
    );
    flock.enable().unwrap();

    let boids = flock.particles().unwrap();
    assert_eq!(boids.len(), 64);
    for boid in &boids {
        assert!(boid.position.abs().cmple(bounds).all(), "{:?} out of bounds", boid.position);
        assert!((boid.forward.length() - 1.0).abs() < 1e-4);
        assert!(boid.size > 0.0);
    }
}

#[test]
fn test_same_seed_same_flock() {
    let config = FlockConfig::new().with_particle_count(64).with_seed(7);
    let (_a, mut first) = cpu_flock(config.clone());
    let (_b, mut second) = cpu_flock(config);
    first.enable().unwrap();
    second.enable().unwrap();
    assert_eq!(first.particles().unwrap(), second.particles().unwrap());
}

#[test]
fn test_ring_layout_steps_by_audio_resolution() {
    let spawner = Spawner::new(256, 36);
    let boids = spawner
        .initialize(360, Vec3::ZERO, SpawnPattern::Ring { radius: 2.0 })
        .unwrap();
    assert_eq!(boids.len(), 360);

    // 360 boids over 36 bins: every 10th boid advances the ring by a degree.
    let boid = &boids[10];
    let radians = PI / 180.0;
    assert!((boid.angle.y - radians).abs() < 1e-6);
    assert_eq!(boid.angle.x, 10.0);
    assert_eq!(boid.radius, 2.0);
    assert!((boid.position - Vec3::new(2.0 * radians.cos(), 2.0 * radians.sin(), 0.0)).length() < 1e-5);
    assert_eq!(boid.original_position, boid.position);
}

#[test]
fn test_zero_count_rejected() {
    let cpu = Rc::new(RefCell::new(CpuBackend::new(32)));
    let config = FlockConfig::new().with_particle_count(0);
    let result = Flock::new(cpu, config, Box::new(SilentSpectrum::new(1024)));
    assert!(matches!(result, Err(FlockError::InvalidArgument(_))));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_enable_disable_buffer_counts() {
    let (cpu, mut flock) = cpu_flock(FlockConfig::new().with_particle_count(64));
    assert_eq!(cpu.borrow().live_buffers(), 0);

    flock.enable().unwrap();
    assert_eq!(cpu.borrow().live_buffers(), 3);

    assert!(flock.disable());
    assert_eq!(cpu.borrow().live_buffers(), 0);
    assert!(matches!(
        flock.tick(1.0 / 60.0, None),
        Err(FlockError::ResourceLifecycle(_))
    ));
}

#[test]
fn test_reenable_allocates_fresh_buffers() {
    let (cpu, mut flock) = cpu_flock(FlockConfig::new().with_particle_count(64));
    flock.enable().unwrap();
    let first = flock.scope().unwrap().particle_buffer().id();
    flock.tick(1.0 / 60.0, None).unwrap();
    flock.disable();

    flock.enable().unwrap();
    let scope = flock.scope().unwrap();
    assert_ne!(scope.particle_buffer().id(), first);
    assert_eq!(scope.frames(), 0);
    assert_eq!(cpu.borrow().live_buffers(), 3);
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn test_still_config_keeps_positions() {
    let (_cpu, mut flock) = cpu_flock(
        FlockConfig::new()
            .with_particle_count(64)
            .with_steering(SteeringConfig::still()),
    );
    flock.enable().unwrap();
    let before = flock.particles().unwrap();
    flock.tick(1.0 / 60.0, None).unwrap();
    let after = flock.particles().unwrap();

    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.position, b.position);
    }
}

#[test]
fn test_reduce_runs_before_steer_each_frame() {
    let (cpu, mut flock) = cpu_flock(FlockConfig::new().with_particle_count(1024));
    flock.enable().unwrap();
    for _ in 0..3 {
        let report = flock.tick(1.0 / 60.0, None).unwrap();
        let reduction = report.reduction.unwrap();
        assert_eq!(reduction.passes, 2);
        assert_eq!(reduction.final_len, 1);
        assert_eq!(report.steer_groups, 16);
    }

    let cpu = cpu.borrow();
    let kernels: Vec<Kernel> = cpu.dispatch_log().iter().map(|r| r.kernel).collect();
    let frame = [Kernel::Reduce, Kernel::Reduce, Kernel::Steer];
    assert_eq!(kernels, [frame, frame, frame].concat());
}

#[test]
fn test_second_pass_reads_first_pass_output() {
    let (cpu, mut flock) = cpu_flock(FlockConfig::new().with_particle_count(1024));
    flock.enable().unwrap();
    let (particles, scratch) = {
        let scope = flock.scope().unwrap();
        (scope.particle_buffer().id(), scope.reduction_buffer().id())
    };
    flock.tick(1.0 / 60.0, None).unwrap();

    let cpu = cpu.borrow();
    let log = cpu.dispatch_log();
    assert_eq!(log[0].binding(bindings::PARTICLE_BUFFER), Some(particles));
    assert_eq!(log[0].binding(bindings::REDUCTION_BUFFER), Some(scratch));
    assert_eq!(log[0].groups, [32, 1, 1]);
    assert_eq!(log[1].binding(bindings::PARTICLE_BUFFER), Some(scratch));
    assert_eq!(log[1].groups, [1, 1, 1]);
    assert_eq!(log[1].uniforms.get(names::PASS_INDEX).and_then(|v| v.as_u32()), Some(1));

    let steer = &log[2];
    assert_eq!(steer.binding(bindings::PARTICLE_BUFFER), Some(particles));
    assert_eq!(steer.binding(bindings::REDUCTION_BUFFER), Some(scratch));
    assert_eq!(
        steer.uniforms.get(names::NUM_PARTICLES).and_then(|v| v.as_u32()),
        Some(1024)
    );
}

#[test]
fn test_sink_receives_rounded_count() {
    let sink = RecordingSink::default();
    let frames = Rc::clone(&sink.frames);
    let (_cpu, flock) = cpu_flock(FlockConfig::new().with_particle_count(1000));
    let mut flock = flock.with_sink(Box::new(sink));
    flock.enable().unwrap();
    flock.tick(1.0 / 60.0, None).unwrap();
    flock.tick(1.0 / 60.0, None).unwrap();

    assert_eq!(*frames.borrow(), vec![(1024, 1024), (1024, 1024)]);
}

#[test]
fn test_sink_receives_requested_count_with_zero_padding() {
    let sink = RecordingSink::default();
    let frames = Rc::clone(&sink.frames);
    let config = FlockConfig::new()
        .with_particle_count(1000)
        .with_pad_with_boids(false);
    let (_cpu, flock) = cpu_flock(config);
    let mut flock = flock.with_sink(Box::new(sink));
    flock.enable().unwrap();
    flock.tick(1.0 / 60.0, None).unwrap();

    assert_eq!(*frames.borrow(), vec![(1000, 1000)]);
}

#[test]
fn test_tap_pushes_boids_away() {
    let config = FlockConfig::new()
        .with_particle_count(64)
        .with_steering(SteeringConfig::still());
    let (cpu, mut flock) = cpu_flock(config);
    flock.enable().unwrap();
    flock
        .tick(1.0 / 60.0, Some(PointerEvent::tap(Vec3::new(1.0, 2.0, 3.0))))
        .unwrap();

    let cpu = cpu.borrow();
    let steer = cpu.dispatch_log().last().unwrap();
    assert_eq!(steer.kernel, Kernel::Steer);
    assert_eq!(
        steer.uniforms.get(names::IS_TAPPED).and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        steer.uniforms.get(names::TAP_POSITION).and_then(|v| v.as_vec3()),
        Some(Vec3::new(1.0, 2.0, 3.0))
    );
}

#[test]
fn test_captured_spectrum_reaches_audio_buffer() {
    let config = FlockConfig::new()
        .with_particle_count(64)
        .with_fft_resolution(256);
    let cpu = Rc::new(RefCell::new(CpuBackend::new(config.block_size)));
    let mut analyzer = SpectrumAnalyzer::new(256).unwrap();
    analyzer
        .bind_clip(AudioClip::sine(440.0, 48_000, 1.0, 0.5))
        .unwrap();
    let mut flock = Flock::new(cpu, config, Box::new(analyzer)).unwrap();
    flock.enable().unwrap();

    let audio = flock.scope().unwrap().audio_buffer().read::<AudioState>().unwrap();
    assert!(audio.iter().all(|a| a.amplitude == 0.0));

    flock.tick(1.0 / 60.0, None).unwrap();
    let audio = flock.scope().unwrap().audio_buffer().read::<AudioState>().unwrap();
    assert_eq!(audio.len(), 256);
    let loudest = audio.iter().map(|a| a.amplitude).fold(0.0f32, f32::max);
    assert!(loudest > 0.1, "loudest bin {}", loudest);
    assert!(audio.iter().all(|a| a.frequency_bucket > 0));
}

#[test]
fn test_audio_buffer_is_never_reallocated() {
    let config = FlockConfig::new()
        .with_particle_count(64)
        .with_fft_resolution(256);
    let cpu = Rc::new(RefCell::new(CpuBackend::new(config.block_size)));
    let mut analyzer = SpectrumAnalyzer::new(256).unwrap();
    analyzer
        .bind_clip(AudioClip::sine(440.0, 48_000, 1.0, 0.5))
        .unwrap();
    let mut flock = Flock::new(cpu.clone(), config, Box::new(analyzer)).unwrap();
    flock.enable().unwrap();
    let audio_id = flock.scope().unwrap().audio_buffer().id();

    for frame in 1..=5 {
        flock.tick(1.0 / 60.0, None).unwrap();
        let scope = flock.scope().unwrap();
        assert_eq!(scope.audio_buffer().id(), audio_id);
        assert_eq!(scope.audio_buffer().len(), 256);
        assert_eq!(scope.frames(), frame);
        assert_eq!(cpu.borrow().live_buffers(), 3);
    }

    let log = cpu.borrow();
    assert!(log
        .dispatch_log()
        .iter()
        .filter(|r| r.kernel == Kernel::Steer)
        .all(|r| r.binding(bindings::AUDIO_BUFFER) == Some(audio_id)));
}

/// Full amplitude on even bins, silence on odd ones.
struct AlternatingSpectrum {
    spectrum: Vec<AudioState>,
}

impl AudioSpectrumSource for AlternatingSpectrum {
    fn resolution(&self) -> usize {
        self.spectrum.len()
    }

    fn capture(&mut self, _frame_dt: f32) -> spectroid::Result<&[AudioState]> {
        Ok(&self.spectrum)
    }
}

#[test]
fn test_loud_boids_move_farther() {
    let config = FlockConfig::new()
        .with_particle_count(64)
        .with_fft_resolution(2)
        .with_steering(
            SteeringConfig::default()
                .with_move_speed(1.0)
                .with_weights(0.0, 0.0, 0.0),
        );
    let cpu = Rc::new(RefCell::new(CpuBackend::new(config.block_size)));
    let audio = AlternatingSpectrum {
        spectrum: vec![
            AudioState {
                amplitude: 1.0,
                frequency_bucket: 800,
            },
            AudioState::default(),
        ],
    };
    let mut flock = Flock::new(cpu, config, Box::new(audio)).unwrap();
    flock.enable().unwrap();

    let before = flock.particles().unwrap();
    let dt = 1.0 / 60.0;
    flock.tick(dt, None).unwrap();
    let after = flock.particles().unwrap();

    for (i, (a, b)) in before.iter().zip(&after).enumerate() {
        let moved = (b.position - a.position).length();
        let expected = if i % 2 == 0 { 2.0 * dt } else { dt };
        assert!((moved - expected).abs() < 1e-4, "boid {} moved {}", i, moved);
    }
    let loud = (after[0].position - before[0].position).length();
    let silent = (after[1].position - before[1].position).length();
    assert!(loud > silent * 1.9);
    assert_eq!(after[0].color.x, 1.0);
    assert_eq!(after[1].color.x, 0.0);
}

#[test]
fn test_unbound_analyzer_drops_frame() {
    let config = FlockConfig::new()
        .with_particle_count(64)
        .with_fft_resolution(256);
    let cpu = Rc::new(RefCell::new(CpuBackend::new(config.block_size)));
    let analyzer = SpectrumAnalyzer::new(256).unwrap();
    let mut flock = Flock::new(cpu, config, Box::new(analyzer)).unwrap();
    flock.enable().unwrap();

    assert!(matches!(flock.tick(1.0 / 60.0, None), Err(FlockError::InvalidState(_))));
    assert!(flock.is_enabled());
    assert_eq!(flock.scope().unwrap().frames(), 0);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_forward_stays_unit(count in 1u32..200, seed in any::<u64>(), speed in 0.0f32..5.0) {
        let config = FlockConfig::new()
            .with_particle_count(count)
            .with_seed(seed)
            .with_steering(SteeringConfig::default().with_move_speed(speed));
        let (_cpu, mut flock) = cpu_flock(config);
        flock.enable().unwrap();
        flock.tick(1.0 / 60.0, None).unwrap();

        let boids = flock.particles().unwrap();
        prop_assert_eq!(boids.len(), count.next_power_of_two() as usize);
        for boid in boids {
            prop_assert!((boid.forward.length() - 1.0).abs() < 1e-3);
            prop_assert!(boid.position.is_finite());
        }
    }
}
