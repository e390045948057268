use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use crate::rotate::Rotator;
use crate::sequence::Frame;

/// Something that can switch physical channels on and off.
pub trait ChannelOutput: Send + 'static {
    fn write(&mut self, channel: usize, on: bool) -> io::Result<()>;

    /// Called once all writes of a frame have been issued.
    fn frame_done(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ChannelOutput + ?Sized> ChannelOutput for Box<T> {
    fn write(&mut self, channel: usize, on: bool) -> io::Result<()> {
        (**self).write(channel, on)
    }

    fn frame_done(&mut self) -> io::Result<()> {
        (**self).frame_done()
    }
}

/// A failed write, tagged with the physical channel it was aimed at
/// (`None` when the end-of-frame hook failed).
#[derive(Debug)]
pub struct WriteFailure {
    pub channel: Option<usize>,
    pub source: io::Error,
}

/// Caches the last state written to each physical channel and skips writes
/// that would not change anything.
pub struct OutputBank<O> {
    output: O,
    last: Vec<Option<bool>>,
}

impl<O: ChannelOutput> OutputBank<O> {
    pub fn new(output: O, channels: usize) -> Self {
        Self {
            output,
            last: vec![None; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.last.len()
    }

    /// Last state written to `physical`, if any.
    pub fn state(&self, physical: usize) -> Option<bool> {
        self.last.get(physical).copied().flatten()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Drive every channel of `frame` through the rotation. Returns the number of writes issued.
    pub fn apply(&mut self, frame: &Frame, rotator: &Rotator) -> Result<usize, WriteFailure> {
        let mut writes = 0;
        for (logical, &on) in frame.states().iter().enumerate() {
            let physical = rotator.physical(logical);
            if self.last[physical] == Some(on) {
                continue;
            }
            self.output
                .write(physical, on)
                .map_err(|source| WriteFailure { channel: Some(physical), source })?;
            self.last[physical] = Some(on);
            writes += 1;
        }
        self.output
            .frame_done()
            .map_err(|source| WriteFailure { channel: None, source })?;
        Ok(writes)
    }
}

/// Linux sysfs GPIO lines, one per channel.
pub struct GpioOutput {
    values: Vec<File>,
}

impl GpioOutput {
    /// Export each pin (if needed), make it an output and open its value file.
    pub fn open(root: &Path, pins: &[u32]) -> io::Result<Self> {
        let mut values = Vec::with_capacity(pins.len());
        for &pin in pins {
            let dir = root.join(format!("gpio{}", pin));
            if !dir.exists() {
                std::fs::write(root.join("export"), pin.to_string())?;
            }
            std::fs::write(dir.join("direction"), "out")?;
            let value = OpenOptions::new().write(true).open(dir.join("value"))?;
            values.push(value);
        }
        log::info!("Opened {} GPIO lines under {}", pins.len(), root.display());
        Ok(Self { values })
    }
}

impl ChannelOutput for GpioOutput {
    fn write(&mut self, channel: usize, on: bool) -> io::Result<()> {
        let file = self.values.get_mut(channel).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no GPIO line for channel {}", channel),
            )
        })?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(if on { b"1" } else { b"0" })
    }
}

/// Draws the channels as a row of lamps on a terminal line.
pub struct ConsoleOutput<W: Write + Send + 'static = io::Stdout> {
    lamps: Vec<bool>,
    out: W,
}

impl ConsoleOutput {
    pub fn stdout(channels: usize) -> Self {
        Self::new(channels, io::stdout())
    }
}

impl<W: Write + Send + 'static> ConsoleOutput<W> {
    pub fn new(channels: usize, out: W) -> Self {
        Self {
            lamps: vec![false; channels],
            out,
        }
    }

    pub fn row(&self) -> String {
        self.lamps.iter().map(|&on| if on { '●' } else { '○' }).collect()
    }
}

impl<W: Write + Send + 'static> ChannelOutput for ConsoleOutput<W> {
    fn write(&mut self, channel: usize, on: bool) -> io::Result<()> {
        match self.lamps.get_mut(channel) {
            Some(lamp) => {
                *lamp = on;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("channel {} out of range", channel),
            )),
        }
    }

    fn frame_done(&mut self) -> io::Result<()> {
        let row = self.row();
        write!(self.out, "\r{}", row)?;
        self.out.flush()
    }
}
