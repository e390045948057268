use crate::sequence::Frame;

const BIAS: f64 = 0.5;
const SPREAD: f64 = 1.25;
const ON_SCORE: f64 = 0.8;

/// Welford accumulator for one channel.
#[derive(Clone, Debug, Default)]
pub struct ChannelStats {
    count: u64,
    mean: f64,
    sum_sq_dev: f64,
}

impl ChannelStats {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_sq_dev += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation; undefined before the second sample.
    pub fn stddev(&self) -> Option<f64> {
        (self.count > 1).then(|| (self.sum_sq_dev / (self.count - 1) as f64).sqrt())
    }

    /// Whether `value` sits far enough above this channel's history to light it.
    pub fn is_on(&self, value: f64) -> bool {
        match self.stddev() {
            Some(stddev) if stddev > 0.0 => {
                let score = (value - self.mean + stddev * BIAS) / (stddev * SPREAD);
                score >= ON_SCORE
            }
            _ => false,
        }
    }
}

/// Per-song adaptive on/off decision for every channel.
#[derive(Clone, Debug)]
pub struct ThresholdEstimator {
    stats: Vec<ChannelStats>,
}

impl ThresholdEstimator {
    pub fn new(channels: usize) -> Self {
        Self {
            stats: vec![ChannelStats::default(); channels],
        }
    }

    /// Fold one frame of bucket values into the statistics and decide each channel.
    pub fn decide(&mut self, buckets: &[f64]) -> Frame {
        let states = self
            .stats
            .iter_mut()
            .enumerate()
            .map(|(i, stats)| {
                let value = buckets.get(i).copied().unwrap_or(0.0);
                stats.update(value);
                stats.is_on(value)
            })
            .collect();
        Frame::from_states(states)
    }

    pub fn stats(&self) -> &[ChannelStats] {
        &self.stats
    }

    pub fn reset(&mut self) {
        self.stats.fill(ChannelStats::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_is_always_dark() {
        let mut estimator = ThresholdEstimator::new(3);
        let frame = estimator.decide(&[255.0, 0.0, 40.0]);
        assert!(frame.lit().is_empty());
    }

    #[test]
    fn constant_input_never_lights() {
        let mut estimator = ThresholdEstimator::new(2);
        for _ in 0..50 {
            let frame = estimator.decide(&[42.0, 0.0]);
            assert!(frame.lit().is_empty());
        }
        for stats in estimator.stats() {
            assert_eq!(stats.stddev(), Some(0.0));
        }
    }

    #[test]
    fn welford_matches_two_pass_statistics() {
        let values = [3.0, 9.0, 4.0, 12.0, 7.5, 0.0, 30.0];
        let mut stats = ChannelStats::default();
        for v in values {
            stats.update(v);
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let sq_dev = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        let var = sq_dev / (values.len() - 1) as f64;
        assert!((stats.mean() - mean).abs() < 1e-9);
        assert!((stats.stddev().unwrap() - var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn lights_on_a_jump_above_the_mean() {
        let mut estimator = ThresholdEstimator::new(1);
        estimator.decide(&[0.0]);
        // mean 5, stddev 7.07: score (5 + 3.54) / 8.84 = 0.97
        assert_eq!(estimator.decide(&[10.0]).lit(), vec![0]);
        // mean 3.33, stddev 5.77: score well below zero
        assert!(estimator.decide(&[0.0]).lit().is_empty());
    }

    #[test]
    fn channels_adapt_independently() {
        let mut estimator = ThresholdEstimator::new(2);
        for v in [10.0, 12.0, 10.0, 12.0, 10.0, 12.0] {
            estimator.decide(&[v, v * 10.0]);
        }
        // Same relative spike on both: both light despite the 10x scale difference
        assert_eq!(estimator.decide(&[20.0, 200.0]).lit(), vec![0, 1]);
        // Spike only relative to channel 0's spread
        assert_eq!(estimator.decide(&[20.0, 110.0]).lit(), vec![0]);
    }

    #[test]
    fn reset_forgets_history() {
        let mut estimator = ThresholdEstimator::new(1);
        estimator.decide(&[1.0]);
        estimator.decide(&[5.0]);
        estimator.reset();
        assert_eq!(estimator.stats()[0].count(), 0);
        assert!(estimator.decide(&[100.0]).lit().is_empty());
    }
}
