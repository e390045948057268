use super::AnalysisError;

/// Splits the useful part of a byte spectrum into one averaged bucket per channel.
#[derive(Clone, Debug)]
pub struct FrequencyBucketer {
    start_bin: usize,
    bucket_size: usize,
    channels: usize,
}

impl FrequencyBucketer {
    pub fn new(
        sample_rate: u32,
        fft_size: usize,
        min_freq: f64,
        max_freq: f64,
        channels: usize,
    ) -> Result<Self, AnalysisError> {
        if channels == 0 {
            return Err(AnalysisError::NoChannels);
        }
        if fft_size == 0 || sample_rate == 0 {
            return Err(AnalysisError::InvalidFftSize(fft_size));
        }

        let bin_size = sample_rate as f64 / fft_size as f64;
        let start_bin = (min_freq / bin_size).ceil().max(0.0) as usize;
        let end_bin = (max_freq / bin_size).floor().max(0.0) as usize;
        if end_bin <= start_bin {
            return Err(AnalysisError::EmptyBand { min_freq, max_freq, bin_size });
        }
        let bucket_size = (end_bin - start_bin).div_ceil(channels);

        Ok(Self {
            start_bin,
            bucket_size,
            channels,
        })
    }

    pub fn start_bin(&self) -> usize {
        self.start_bin
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Average magnitude per channel. Bins past the end of `magnitudes` count as zero.
    pub fn buckets(&self, magnitudes: &[u8]) -> Vec<f64> {
        (0..self.channels)
            .map(|i| {
                let first = self.start_bin + i * self.bucket_size;
                let sum: u32 = (first..first + self.bucket_size)
                    .map(|bin| magnitudes.get(bin).copied().unwrap_or(0) as u32)
                    .sum();
                sum as f64 / self.bucket_size as f64
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_layout_at_44100() {
        let bucketer = FrequencyBucketer::new(44100, 2048, 20.0, 15000.0, 16).unwrap();
        // 21.53 Hz bins: 20 Hz rounds up to bin 1, 15 kHz down to bin 696
        assert_eq!(bucketer.start_bin(), 1);
        assert_eq!(bucketer.bucket_size(), 44);

        let bucketer = FrequencyBucketer::new(44100, 2048, 20.0, 15000.0, 8).unwrap();
        assert_eq!(bucketer.bucket_size(), 87);
    }

    #[test]
    fn averages_consecutive_bins() {
        // 1 Hz bins: start at bin 2, end at bin 8, two buckets of three
        let bucketer = FrequencyBucketer::new(16, 16, 2.0, 8.0, 2).unwrap();
        let magnitudes = [99, 99, 3, 6, 9, 30, 60, 90, 99];
        assert_eq!(bucketer.buckets(&magnitudes), vec![6.0, 60.0]);
    }

    #[test]
    fn reads_past_the_end_as_zero() {
        let bucketer = FrequencyBucketer::new(16, 16, 2.0, 8.0, 2).unwrap();
        assert_eq!(bucketer.buckets(&[0, 0, 3, 6, 9, 30]), vec![6.0, 10.0]);
        assert_eq!(bucketer.buckets(&[]), vec![0.0, 0.0]);
    }

    #[test]
    fn rejects_band_narrower_than_a_bin() {
        let err = FrequencyBucketer::new(44100, 32, 20.0, 100.0, 8).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyBand { .. }));
        assert!(matches!(
            FrequencyBucketer::new(44100, 2048, 20.0, 15000.0, 0),
            Err(AnalysisError::NoChannels)
        ));
    }
}
