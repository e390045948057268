pub mod bucket;
pub mod threshold;

use indicatif::ProgressBar;
use thiserror::Error;

use crate::audio::decode::AudioData;
use crate::audio::spectrum::{SpectrumSettings, Snapshots};
use crate::config::AnalysisConfig;
use crate::sequence::{Frame, FrameSequence, SequenceError};
use bucket::FrequencyBucketer;
use threshold::ThresholdEstimator;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("at least one channel is required")]
    NoChannels,
    #[error("invalid FFT size {0}")]
    InvalidFftSize(usize),
    #[error("no FFT bins between {min_freq} Hz and {max_freq} Hz at {bin_size:.2} Hz per bin")]
    EmptyBand {
        min_freq: f64,
        max_freq: f64,
        bin_size: f64,
    },
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Turns one spectral snapshot at a time into one frame of channel states.
///
/// Holds the per-song statistics, so use a fresh stepper (or `reset`) per track.
pub struct FrameStepper {
    bucketer: FrequencyBucketer,
    estimator: ThresholdEstimator,
}

impl FrameStepper {
    pub fn new(bucketer: FrequencyBucketer, channels: usize) -> Self {
        Self {
            bucketer,
            estimator: ThresholdEstimator::new(channels),
        }
    }

    pub fn step(&mut self, snapshot: &[u8]) -> Frame {
        let buckets = self.bucketer.buckets(snapshot);
        self.estimator.decide(&buckets)
    }

    pub fn reset(&mut self) {
        self.estimator.reset();
    }
}

/// Run the whole track through the stepper and collect the light show.
pub fn analyze(
    audio: &AudioData,
    cfg: &AnalysisConfig,
    progress: Option<&ProgressBar>,
) -> Result<FrameSequence, AnalysisError> {
    let bucketer = FrequencyBucketer::new(
        audio.sample_rate,
        cfg.fft_size,
        cfg.min_freq,
        cfg.max_freq,
        cfg.channels,
    )?;
    log::info!(
        "Bucketing bins {}..{} into {} channels of {} bins",
        bucketer.start_bin(),
        bucketer.start_bin() + cfg.channels * bucketer.bucket_size(),
        cfg.channels,
        bucketer.bucket_size()
    );

    let mut stepper = FrameStepper::new(bucketer, cfg.channels);
    let mut sequence = FrameSequence::new(cfg.fps, cfg.channels)?;
    let settings = SpectrumSettings::from(cfg);
    let snapshots = Snapshots::new(&audio.samples, audio.sample_rate, cfg.fps, settings);
    if let Some(pb) = progress {
        pb.set_length(snapshots.len() as u64);
    }

    let mut lit_total = 0usize;
    for snapshot in snapshots {
        let frame = stepper.step(&snapshot);
        lit_total += frame.lit().len();
        sequence.push(frame)?;
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    let slots = (sequence.len() * cfg.channels).max(1);
    log::info!(
        "Analyzed {} frames at {} fps, {:.1}% of channel-frames lit",
        sequence.len(),
        cfg.fps,
        100.0 * lit_total as f64 / slots as f64
    );
    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            fps: 10,
            channels: 4,
            fft_size: 512,
            min_freq: 20.0,
            max_freq: 3900.0,
            ..AnalysisConfig::default()
        }
    }

    /// Low tone throughout, with a bright high burst every half second.
    fn bursty_track(sample_rate: u32, seconds: f32) -> AudioData {
        let n = (sample_rate as f32 * seconds) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let low = 0.3 * (2.0 * std::f32::consts::PI * 100.0 * t).sin();
                let burst = if (t * 2.0).fract() < 0.2 {
                    0.5 * (2.0 * std::f32::consts::PI * 3000.0 * t).sin()
                } else {
                    0.0
                };
                low + burst
            })
            .collect();
        AudioData { samples, sample_rate }
    }

    #[test]
    fn stepper_lights_a_channel_that_spikes() {
        let bucketer = FrequencyBucketer::new(16, 16, 2.0, 8.0, 2).unwrap();
        let mut stepper = FrameStepper::new(bucketer, 2);
        let quiet = [0, 0, 10, 10, 10, 10, 10, 10];
        let loud = [0, 0, 10, 10, 10, 200, 200, 200];
        assert!(stepper.step(&quiet).lit().is_empty());
        for _ in 0..5 {
            stepper.step(&quiet);
        }
        assert_eq!(stepper.step(&loud).lit(), vec![1]);
        stepper.reset();
        assert!(stepper.step(&loud).lit().is_empty());
    }

    #[test]
    fn one_frame_per_interval_of_audio() {
        let audio = bursty_track(8000, 2.05);
        let seq = analyze(&audio, &config(), None).unwrap();
        assert_eq!(seq.fps(), 10);
        assert_eq!(seq.channels(), 4);
        assert_eq!(seq.len(), 21);
        assert!(seq.frames()[0].lit().is_empty());
    }

    #[test]
    fn bursts_light_the_high_channel() {
        let audio = bursty_track(8000, 3.0);
        let seq = analyze(&audio, &config(), None).unwrap();
        // 15.6 Hz bins from bin 2 to 249: the top bucket covers ~2.9-3.9 kHz
        // Frame 5 ends at 0.6 s, just after the second burst starts
        assert!(seq.frames()[5].is_on(3));
        let high_on = seq.frames().iter().filter(|f| f.is_on(3)).count();
        assert!(high_on < seq.len() * 3 / 4);
    }

    #[test]
    fn silence_stays_dark() {
        let audio = AudioData {
            samples: vec![0.0; 16000],
            sample_rate: 8000,
        };
        let seq = analyze(&audio, &config(), None).unwrap();
        assert_eq!(seq.len(), 20);
        assert!(seq.frames().iter().all(|f| f.lit().is_empty()));
    }

    #[test]
    fn impossible_band_is_rejected() {
        let cfg = AnalysisConfig {
            min_freq: 3000.0,
            max_freq: 3001.0,
            ..config()
        };
        let audio = AudioData {
            samples: vec![0.0; 800],
            sample_rate: 8000,
        };
        assert!(matches!(
            analyze(&audio, &cfg, None),
            Err(AnalysisError::EmptyBand { .. })
        ));
    }
}
