//! Headless flock runner.
//!
//! Spawns a flock, feeds it a synthetic tone and logs the flock summary
//! every few frames. `RUST_LOG` controls verbosity (default `info`).

use std::cell::RefCell;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spectroid::prelude::*;
use spectroid::spawn::{DEFAULT_GRID_SPACING, DEFAULT_RING_RADIUS};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    Cpu,
    Gpu,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PatternKind {
    Random,
    Ring,
    Grid,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "spectroid")]
#[command(about = "Audio-reactive compute flocking", long_about = None)]
struct Args {
    /// Compute backend
    #[arg(long, value_enum, default_value = "cpu")]
    backend: BackendKind,

    /// Number of frames to simulate
    #[arg(long, default_value = "600")]
    frames: u64,

    /// Boid count (overrides the config file)
    #[arg(long)]
    count: Option<u32>,

    /// Spawn pattern (overrides the config file)
    #[arg(long, value_enum)]
    pattern: Option<PatternKind>,

    /// Flock config JSON
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Frequency of the driving tone in Hz
    #[arg(long, value_name = "HZ", default_value = "220")]
    tone: f32,

    /// Log the flock summary every N frames
    #[arg(long, value_name = "N", default_value = "60")]
    report_every: u64,
}

/// Logs the flock centroid every `every` frames.
struct LogSink {
    every: u64,
    frame: u64,
}

impl PresentationSink for LogSink {
    fn present(&mut self, particles: &[BoidState], count: u32) -> Result<()> {
        self.frame += 1;
        if self.every == 0 || self.frame % self.every != 0 || count == 0 {
            return Ok(());
        }
        let (centroid, heading) = particles.iter().fold((Vec3::ZERO, Vec3::ZERO), |(c, h), b| {
            (c + b.position, h + b.forward)
        });
        let centroid = centroid / count as f32;
        let heading = (heading / count as f32).normalize_or_zero();
        info!(
            frame = self.frame,
            count,
            centroid = ?centroid.to_array(),
            heading = ?heading.to_array(),
            "flock"
        );
        Ok(())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "spectroid failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> std::result::Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => FlockConfig::load(path)?,
        None => FlockConfig::new(),
    };
    if let Some(count) = args.count {
        config = config.with_particle_count(count);
    }
    if let Some(pattern) = args.pattern {
        config = config.with_pattern(match pattern {
            PatternKind::Random => SpawnPattern::Random,
            PatternKind::Ring => SpawnPattern::Ring {
                radius: DEFAULT_RING_RADIUS,
            },
            PatternKind::Grid => SpawnPattern::Grid {
                spacing: DEFAULT_GRID_SPACING,
            },
        });
    }

    let backend: SharedBackend = match args.backend {
        BackendKind::Cpu => Rc::new(RefCell::new(CpuBackend::new(config.block_size))),
        BackendKind::Gpu => {
            let gpu = WgpuBackend::new(config.block_size)?;
            info!(adapter = %gpu.adapter_info().name, "using wgpu backend");
            Rc::new(RefCell::new(gpu))
        }
    };

    let mut analyzer = SpectrumAnalyzer::new(config.fft_resolution)?;
    analyzer.bind_clip(AudioClip::sine(args.tone, 48_000, 2.0, 0.5))?;

    let sink = LogSink {
        every: args.report_every,
        frame: 0,
    };
    let mut flock = Flock::new(backend, config, Box::new(analyzer))?.with_sink(Box::new(sink));
    flock.enable()?;

    let mut clock = FrameClock::fixed(1.0 / 60.0);
    let mut dropped = 0u64;
    for _ in 0..args.frames {
        let dt = clock.tick();
        if flock.tick(dt, None).is_err() {
            dropped += 1;
        }
    }

    info!(
        frames = clock.frame(),
        dropped,
        simulated_secs = clock.simulated(),
        wall_secs = clock.wall_elapsed().as_secs_f32(),
        "run finished"
    );
    flock.disable();
    Ok(())
}
