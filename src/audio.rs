//! Audio spectrum capture.
//!
//! Once per frame the flock asks its [`AudioSpectrumSource`] for a fixed-size
//! snapshot of `{amplitude, frequency_bucket}` entries, which is uploaded to
//! the `audioBuffer` binding. [`SpectrumAnalyzer`] produces that snapshot from
//! a looping [`AudioClip`] with a Blackman-Harris windowed FFT.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::TAU;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{FlockError, Result};
use crate::particle::AudioState;

/// Spectrum resolution used when none is configured.
pub const DEFAULT_FFT_RESOLUTION: u32 = 1024;

/// Lower bound of the update rate used for the frequency bucket.
pub const MIN_UPDATE_RATE: f32 = 60.0;

const BLACKMAN_HARRIS: [f32; 4] = [0.35875, 0.48829, 0.14128, 0.01168];

/// Producer of one spectrum snapshot per frame.
pub trait AudioSpectrumSource {
    /// Number of entries every snapshot holds.
    fn resolution(&self) -> usize;

    /// Produce this frame's snapshot. Must not block.
    fn capture(&mut self, frame_dt: f32) -> Result<&[AudioState]>;
}

/// Mono PCM samples at a fixed sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self { sample_rate, samples }
    }

    /// A pure tone of `frequency` Hz lasting `seconds`.
    pub fn sine(frequency: f32, sample_rate: u32, seconds: f32, amplitude: f32) -> Self {
        let len = (sample_rate as f32 * seconds).round() as usize;
        let samples = (0..len)
            .map(|n| amplitude * (TAU * frequency * n as f32 / sample_rate as f32).sin())
            .collect();
        Self { sample_rate, samples }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// FFT analyzer over a bound, looping clip.
pub struct SpectrumAnalyzer {
    resolution: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_sum: f32,
    fft_buffer: Vec<Complex<f32>>,
    scratch_buffer: Vec<Complex<f32>>,
    spectrum: Vec<AudioState>,
    clip: Option<AudioClip>,
    playhead: f64,
}

impl SpectrumAnalyzer {
    /// Create an analyzer reporting `resolution` bins.
    ///
    /// `resolution` must be a power of two of at least 2.
    pub fn new(resolution: u32) -> Result<Self> {
        if resolution < 2 || !resolution.is_power_of_two() {
            return Err(FlockError::invalid_argument(format!(
                "spectrum resolution must be a power of two >= 2, got {}",
                resolution
            )));
        }
        let resolution = resolution as usize;
        let fft_size = resolution * 2;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let window = blackman_harris(fft_size);
        let window_sum = window.iter().sum();

        debug!(resolution, fft_size, "spectrum analyzer created");

        Ok(Self {
            resolution,
            fft,
            window,
            window_sum,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch_buffer: vec![Complex::new(0.0, 0.0); scratch_len],
            spectrum: vec![AudioState::default(); resolution],
            clip: None,
            playhead: 0.0,
        })
    }

    /// Start analyzing `clip` from its first sample.
    pub fn bind_clip(&mut self, clip: AudioClip) -> Result<()> {
        if clip.samples.is_empty() || clip.sample_rate == 0 {
            return Err(FlockError::invalid_argument(
                "audio clip needs samples and a non-zero sample rate",
            ));
        }
        debug!(
            sample_rate = clip.sample_rate,
            seconds = clip.duration_secs(),
            "audio clip bound"
        );
        self.clip = Some(clip);
        self.playhead = 0.0;
        Ok(())
    }

    /// Drop the bound clip. Later captures fail until a new one is bound.
    pub fn unbind_clip(&mut self) -> Option<AudioClip> {
        self.playhead = 0.0;
        self.clip.take()
    }

    pub fn has_clip(&self) -> bool {
        self.clip.is_some()
    }

    /// Most recent snapshot.
    pub fn spectrum(&self) -> &[AudioState] {
        &self.spectrum
    }

    fn analyze(&mut self, frame_dt: f32) -> Result<()> {
        let clip = self
            .clip
            .as_ref()
            .ok_or_else(|| FlockError::invalid_state("no audio clip bound to the spectrum source"))?;

        let len = clip.samples.len();
        let fft_size = self.fft_buffer.len();
        self.playhead = (self.playhead + frame_dt as f64 * clip.sample_rate as f64) % len as f64;

        // Window the fft_size samples ending at the playhead.
        let end = self.playhead as usize;
        let start = (end + len * (fft_size / len + 1) - fft_size) % len;
        for (i, slot) in self.fft_buffer.iter_mut().enumerate() {
            let sample = clip.samples[(start + i) % len];
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch_buffer);

        let update_rate = if frame_dt > 0.0 {
            (1.0 / frame_dt).max(MIN_UPDATE_RATE)
        } else {
            f32::INFINITY
        };
        let frequency_bucket = (clip.sample_rate as f32 / update_rate) as i32;

        for (state, bin) in self.spectrum.iter_mut().zip(&self.fft_buffer) {
            state.amplitude = bin.norm() / self.window_sum;
            state.frequency_bucket = frequency_bucket;
        }

        trace!(playhead = self.playhead, frequency_bucket, "spectrum captured");
        Ok(())
    }
}

impl AudioSpectrumSource for SpectrumAnalyzer {
    fn resolution(&self) -> usize {
        self.resolution
    }

    fn capture(&mut self, frame_dt: f32) -> Result<&[AudioState]> {
        if !frame_dt.is_finite() || frame_dt < 0.0 {
            return Err(FlockError::invalid_argument(format!(
                "frame delta must be finite and non-negative, got {}",
                frame_dt
            )));
        }
        self.analyze(frame_dt)?;
        Ok(&self.spectrum)
    }
}

/// Source that always reports silence.
#[derive(Clone, Debug)]
pub struct SilentSpectrum {
    spectrum: Vec<AudioState>,
}

impl SilentSpectrum {
    pub fn new(resolution: usize) -> Self {
        Self {
            spectrum: vec![AudioState::default(); resolution],
        }
    }
}

impl AudioSpectrumSource for SilentSpectrum {
    fn resolution(&self) -> usize {
        self.spectrum.len()
    }

    fn capture(&mut self, _frame_dt: f32) -> Result<&[AudioState]> {
        Ok(&self.spectrum)
    }
}

fn blackman_harris(len: usize) -> Vec<f32> {
    let denom = (len - 1) as f32;
    let [a0, a1, a2, a3] = BLACKMAN_HARRIS;
    (0..len)
        .map(|n| {
            let x = TAU * n as f32 / denom;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos() - a3 * (3.0 * x).cos()
        })
        .collect()
}
