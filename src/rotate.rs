/// Map a logical channel to its physical channel under a cyclic shift of `offset`.
pub fn physical(logical: usize, offset: usize, channels: usize) -> usize {
    (logical + offset) % channels
}

/// Cyclic logical-to-physical channel permutation that advances with frame count.
///
/// The offset moves forward by one after every `period` processed frames, so
/// after `channels * period` frames the mapping is back to the identity.
/// A period of 0 disables rotation.
#[derive(Clone, Debug)]
pub struct Rotator {
    channels: usize,
    period: usize,
    offset: usize,
    processed: usize,
}

impl Rotator {
    pub fn new(channels: usize, period: usize) -> Self {
        Self {
            channels: channels.max(1),
            period,
            offset: 0,
            processed: 0,
        }
    }

    pub fn physical(&self, logical: usize) -> usize {
        physical(logical, self.offset, self.channels)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Record one processed frame, rotating when a full period has elapsed.
    pub fn frame_done(&mut self) {
        if self.period == 0 {
            return;
        }
        self.processed = (self.processed + 1) % self.period;
        if self.processed == 0 {
            self.offset = (self.offset + 1) % self.channels;
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.processed = 0;
    }
}
