//! Byte-valued spectrum snapshots in the style of a browser analyser node:
//! Blackman window, magnitude smoothing across snapshots, decibel mapping
//! onto `0..=255`.

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::AnalysisConfig;

#[derive(Clone, Debug)]
pub struct SpectrumSettings {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl From<&AnalysisConfig> for SpectrumSettings {
    fn from(cfg: &AnalysisConfig) -> Self {
        Self {
            fft_size: cfg.fft_size,
            smoothing: cfg.smoothing,
            min_decibels: cfg.min_decibels,
            max_decibels: cfg.max_decibels,
        }
    }
}

/// Number of snapshots needed to cover `num_samples` at `fps`.
pub fn snapshot_count(num_samples: usize, sample_rate: u32, fps: u8) -> usize {
    let duration = num_samples as f64 / sample_rate as f64;
    (duration * fps as f64).ceil() as usize
}

/// Sample position of snapshot `index`: one frame interval past its start.
fn snapshot_end(index: usize, sample_rate: u32, fps: u8) -> usize {
    ((index + 1) as f64 * sample_rate as f64 / fps as f64).round() as usize
}

/// Unsmoothed `|X[k]| / N` for the window ending at `end`.
fn magnitudes_at(samples: &[f32], end: usize, fft_size: usize, window: &[f32]) -> Vec<f32> {
    let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_size];
    let start = end as isize - fft_size as isize;
    for (i, slot) in buffer.iter_mut().enumerate() {
        let pos = start + i as isize;
        if pos >= 0 && (pos as usize) < samples.len() {
            *slot = Complex::new(samples[pos as usize] * window[i], 0.0);
        }
    }

    // Per-thread planner (rayon-safe)
    let mut planner = FftPlanner::<f32>::new();
    planner.plan_fft_forward(fft_size).process(&mut buffer);

    let scale = 1.0 / fft_size as f32;
    buffer[..fft_size / 2].iter().map(|c| c.norm() * scale).collect()
}

fn blackman_window(size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Snapshots transformed per parallel batch. Bounds the unsmoothed spectra
/// held at once to `CHUNK * fft_size / 2` floats regardless of track length.
const CHUNK: usize = 256;

/// Iterator over byte spectra, one per frame.
///
/// FFTs are computed in parallel, one chunk of snapshots at a time; the
/// smoothing and byte mapping run in order since each snapshot depends on
/// the previous one.
pub struct Snapshots<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    fps: u8,
    window: Vec<f32>,
    next: usize,
    count: usize,
    chunk: usize,
    raw: std::vec::IntoIter<Vec<f32>>,
    smoothed: Vec<f32>,
    settings: SpectrumSettings,
}

impl<'a> Snapshots<'a> {
    pub fn new(samples: &'a [f32], sample_rate: u32, fps: u8, settings: SpectrumSettings) -> Self {
        Self {
            samples,
            sample_rate,
            fps,
            window: blackman_window(settings.fft_size),
            next: 0,
            count: snapshot_count(samples.len(), sample_rate, fps),
            chunk: CHUNK,
            raw: Vec::new().into_iter(),
            smoothed: vec![0.0; settings.fft_size / 2],
            settings,
        }
    }

    #[cfg(test)]
    fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    fn refill(&mut self) {
        let end = (self.next + self.chunk).min(self.count);
        let (samples, sample_rate, fps) = (self.samples, self.sample_rate, self.fps);
        let (fft_size, window) = (self.settings.fft_size, &self.window);
        let raw: Vec<Vec<f32>> = (self.next..end)
            .into_par_iter()
            .map(|i| magnitudes_at(samples, snapshot_end(i, sample_rate, fps), fft_size, window))
            .collect();
        self.next = end;
        self.raw = raw.into_iter();
    }

    fn to_byte(&self, magnitude: f32) -> u8 {
        let SpectrumSettings { min_decibels, max_decibels, .. } = self.settings;
        let db = 20.0 * magnitude.max(f32::MIN_POSITIVE).log10();
        let scaled = 255.0 * (db - min_decibels) / (max_decibels - min_decibels);
        scaled.floor().clamp(0.0, 255.0) as u8
    }
}

impl Iterator for Snapshots<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.raw.len() == 0 {
            if self.next >= self.count {
                return None;
            }
            self.refill();
        }
        let raw = self.raw.next()?;
        let tau = self.settings.smoothing;
        for (s, m) in self.smoothed.iter_mut().zip(&raw) {
            *s = tau * *s + (1.0 - tau) * m;
        }
        Some(self.smoothed.iter().map(|&s| self.to_byte(s)).collect())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.raw.len() + (self.count - self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Snapshots<'_> {}
