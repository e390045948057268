//! Binary light-show format.
//!
//! ```text
//! byte 0:        frames per second (1..=255)
//! byte 1..end:   frames, each ceil(channels / 8) bytes
//! ```
//!
//! Channel `i` of a frame lives in bit `i % 8` (bit 0 = least significant) of
//! byte `i / 8` of that frame.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("malformed sequence: {len} bytes is not 1 + k * {frame_bytes}")]
    MalformedLength { len: usize, frame_bytes: usize },
    #[error("malformed sequence: frame rate is 0")]
    ZeroFrameRate,
    #[error("frame has {got} channels, sequence has {expected}")]
    ChannelCountMismatch { expected: usize, got: usize },
    #[error("a sequence needs at least one channel")]
    NoChannels,
}

impl SequenceError {
    /// True for the errors that mean the input bytes cannot be a sequence.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedLength { .. } | Self::ZeroFrameRate)
    }
}

/// Number of bytes one frame of `channels` channels occupies on the wire.
pub fn bytes_per_frame(channels: usize) -> usize {
    channels.div_ceil(8)
}

/// On/off state of every channel at one time step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    states: Vec<bool>,
}

impl Frame {
    /// All channels off.
    pub fn off(channels: usize) -> Self {
        Self {
            states: vec![false; channels],
        }
    }

    pub fn from_states(states: Vec<bool>) -> Self {
        Self { states }
    }

    /// Frame with exactly the listed channels lit. Out-of-range indices are ignored.
    pub fn with_lit(channels: usize, lit: &[usize]) -> Self {
        let mut frame = Self::off(channels);
        for &i in lit {
            if i < channels {
                frame.states[i] = true;
            }
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_on(&self, channel: usize) -> bool {
        self.states.get(channel).copied().unwrap_or(false)
    }

    pub fn states(&self) -> &[bool] {
        &self.states
    }

    /// Indices of the lit channels, ascending.
    pub fn lit(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect()
    }

    fn pack_into(&self, out: &mut Vec<u8>) {
        for chunk in self.states.chunks(8) {
            let byte = chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (bit, &on)| acc | ((on as u8) << bit));
            out.push(byte);
        }
    }

    fn unpack(bytes: &[u8], channels: usize) -> Self {
        let states = (0..channels)
            .map(|i| (bytes[i / 8] >> (i % 8)) & 1 == 1)
            .collect();
        Self { states }
    }
}

/// Ordered frames plus the rate they are meant to be played at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSequence {
    fps: u8,
    channels: usize,
    frames: Vec<Frame>,
}

impl FrameSequence {
    pub fn new(fps: u8, channels: usize) -> Result<Self, SequenceError> {
        if fps == 0 {
            return Err(SequenceError::ZeroFrameRate);
        }
        if channels == 0 {
            return Err(SequenceError::NoChannels);
        }
        Ok(Self {
            fps,
            channels,
            frames: Vec::new(),
        })
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), SequenceError> {
        if frame.len() != self.channels {
            return Err(SequenceError::ChannelCountMismatch {
                expected: self.channels,
                got: frame.len(),
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn fps(&self) -> u8 {
        self.fps
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Pacing interval between frames, floored to whole milliseconds.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps as u64)
    }

    /// Offset of frame `index` from the start of the sequence.
    pub fn time_of(&self, index: usize) -> Duration {
        Duration::from_secs_f64(index as f64 / self.fps as f64)
    }

    pub fn duration(&self) -> Duration {
        self.time_of(self.frames.len())
    }

    /// Wall time the playback loop spends on the whole sequence at the floored
    /// frame interval.
    pub fn play_time(&self) -> Duration {
        self.frame_interval() * self.frames.len() as u32
    }

    /// Fraction of frames each channel is lit for.
    pub fn duty_cycles(&self) -> Vec<f64> {
        let mut lit = vec![0usize; self.channels];
        for frame in &self.frames {
            for channel in frame.lit() {
                lit[channel] += 1;
            }
        }
        let total = self.frames.len().max(1) as f64;
        lit.into_iter().map(|n| n as f64 / total).collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.frames.len() * bytes_per_frame(self.channels));
        out.push(self.fps);
        for frame in &self.frames {
            frame.pack_into(&mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8], channels: usize) -> Result<Self, SequenceError> {
        if channels == 0 {
            return Err(SequenceError::NoChannels);
        }
        let frame_bytes = bytes_per_frame(channels);
        let malformed = SequenceError::MalformedLength {
            len: bytes.len(),
            frame_bytes,
        };
        let Some((&fps, body)) = bytes.split_first() else {
            return Err(malformed);
        };
        if body.len() % frame_bytes != 0 {
            return Err(malformed);
        }
        if fps == 0 {
            return Err(SequenceError::ZeroFrameRate);
        }

        let frames = body
            .chunks_exact(frame_bytes)
            .map(|chunk| Frame::unpack(chunk, channels))
            .collect();

        Ok(Self {
            fps,
            channels,
            frames,
        })
    }
}
