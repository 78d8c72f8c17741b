//! Transmission targets for finished waveforms

use std::io::Write;

use crate::core::Level;
use crate::encoding::pack_bits;
use crate::error::{IebusError, Result};
use crate::timing::{render, to_samples, TimedSegment};

/// Something that can put a waveform on the bus
///
/// Each call sends one complete waveform before returning.
pub trait Transmitter {
    /// Send an ordered waveform
    fn transmit(&mut self, segments: &[TimedSegment]) -> Result<()>;
}

/// Writes a text listing instead of driving hardware
pub struct Simulator<W: Write> {
    out: W,
}

impl<W: Write> Simulator<W> {
    /// Create a simulator writing to `out`
    pub fn new(out: W) -> Self {
        Simulator { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Transmitter for Simulator<W> {
    fn transmit(&mut self, segments: &[TimedSegment]) -> Result<()> {
        self.out
            .write_all(render(segments).as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|e| IebusError::transmit_error(format!("simulator output: {}", e)))
    }
}

/// Packed sample image for a clocked serial bit-bang device
///
/// The waveform is sampled at `clock_hz` and packed MSB-first; each
/// transmission is padded out to a whole byte with the idle level.
#[derive(Debug, Clone)]
pub struct BitImage {
    clock_hz: u32,
    idle: Level,
    bytes: Vec<u8>,
}

impl BitImage {
    /// Create an empty image for the given clock and idle level
    pub fn new(clock_hz: u32, idle: Level) -> Result<Self> {
        if clock_hz == 0 {
            return Err(IebusError::config_error("Clock rate must be positive"));
        }
        Ok(BitImage {
            clock_hz,
            idle,
            bytes: Vec::new(),
        })
    }

    /// Packed bytes accumulated so far
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the packed bytes, leaving the image empty
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

impl Transmitter for BitImage {
    fn transmit(&mut self, segments: &[TimedSegment]) -> Result<()> {
        let samples = to_samples(segments, self.clock_hz);
        self.bytes.extend(pack_bits(&samples, self.idle.as_bit()));
        Ok(())
    }
}
