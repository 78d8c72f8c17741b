//! Pulse-width timing for IEBus bit-banging
//!
//! Every bit on the bus is a pulse at the active level followed by a release
//! to the idle level. The pulse width carries the value: a long start pulse
//! opens the frame, a short pulse is a 1, a longer pulse is a 0. All widths
//! live in [`BusTiming`] so they can be recalibrated against real hardware.

use tracing::debug;

use crate::bus;
use crate::core::{Level, Polarity};
use crate::error::{IebusError, Result};
use crate::message::Message;

/// Pulse widths and gaps, all in microseconds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusTiming {
    /// Nominal bit period (T_Bit)
    pub bit_period_us: f64,
    /// Start pulse width (T_Start)
    pub start_us: f64,
    /// Released gap between the start pulse and the first bit
    pub start_sync_us: f64,
    /// Active width of a 0 bit (T_Bit0)
    pub bit0_us: f64,
    /// Active width of a 1 bit (T_Bit1)
    pub bit1_us: f64,
    /// Idle time after a frame (T_Wait)
    pub wait_us: f64,
    /// Idle time after which a receiver abandons a frame
    pub timeout_us: f64,
    /// Idle level of the line
    pub polarity: Polarity,
}

impl BusTiming {
    /// IEBus mode 2 timing at the exact nominal bit period
    pub fn nominal() -> Self {
        let t_bit = bus::NOMINAL_BIT_PERIOD_US;
        BusTiming {
            bit_period_us: t_bit,
            start_us: bus::START_BIT_US,
            start_sync_us: t_bit / 2.0,
            bit0_us: 4.0 * t_bit / 5.0,
            bit1_us: t_bit / 2.0,
            wait_us: bus::TX_WAIT_US,
            timeout_us: bus::TIMEOUT_US,
            polarity: Polarity::default(),
        }
    }

    /// Round every duration to whole ticks of a transmitter clock
    pub fn quantized(&self, clock_hz: u32) -> Self {
        let tick_us = 1e6 / clock_hz as f64;
        let q = |us: f64| (us / tick_us).round() * tick_us;
        BusTiming {
            bit_period_us: q(self.bit_period_us),
            start_us: q(self.start_us),
            start_sync_us: q(self.start_sync_us),
            bit0_us: q(self.bit0_us),
            bit1_us: q(self.bit1_us),
            wait_us: q(self.wait_us),
            timeout_us: q(self.timeout_us),
            polarity: self.polarity,
        }
    }

    /// Multiply every duration by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        BusTiming {
            bit_period_us: self.bit_period_us * factor,
            start_us: self.start_us * factor,
            start_sync_us: self.start_sync_us * factor,
            bit0_us: self.bit0_us * factor,
            bit1_us: self.bit1_us * factor,
            wait_us: self.wait_us * factor,
            timeout_us: self.timeout_us * factor,
            polarity: self.polarity,
        }
    }

    /// Pulse width separating a 1 from a 0
    pub fn bit_measure_us(&self) -> f64 {
        (self.bit0_us + self.bit1_us) / 2.0
    }

    /// Pulse width separating a 0 from a start pulse
    pub fn start_measure_us(&self) -> f64 {
        (self.bit0_us + self.start_us) / 2.0
    }

    /// Active width for a bit value
    pub fn bit_us(&self, bit: bool) -> f64 {
        if bit {
            self.bit1_us
        } else {
            self.bit0_us
        }
    }

    /// Check that the pulse widths describe a decodable bus
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("bit_period_us", self.bit_period_us),
            ("start_us", self.start_us),
            ("start_sync_us", self.start_sync_us),
            ("bit0_us", self.bit0_us),
            ("bit1_us", self.bit1_us),
            ("wait_us", self.wait_us),
            ("timeout_us", self.timeout_us),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value <= 0.0 {
                return Err(IebusError::config_error(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.bit0_us >= self.bit_period_us || self.bit1_us >= self.bit_period_us {
            return Err(IebusError::config_error(
                "Bit pulse widths must be shorter than the bit period",
            ));
        }
        if self.bit0_us == self.bit1_us {
            return Err(IebusError::config_error(
                "0 and 1 pulse widths must differ",
            ));
        }
        if self.start_us <= self.bit0_us.max(self.bit1_us) {
            return Err(IebusError::config_error(
                "Start pulse must be longer than either bit pulse",
            ));
        }
        Ok(())
    }

    /// Load a hardware calibration from JSON
    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> Result<Self> {
        let timing: BusTiming = serde_json::from_str(text)
            .map_err(|e| IebusError::config_error(format!("Timing calibration: {}", e)))?;
        timing.validate()?;
        Ok(timing)
    }
}

impl Default for BusTiming {
    fn default() -> Self {
        BusTiming::nominal().quantized(bus::CLOCK_HZ)
    }
}

/// One symbol on the wire: `level` for `duration_us`, then the opposite
/// level for `release_us`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimedSegment {
    /// Driven level
    pub level: Level,
    /// How long the level is held
    pub duration_us: f64,
    /// How long the line then sits at the opposite level
    pub release_us: f64,
}

impl TimedSegment {
    /// A plain level hold with no release
    pub fn hold(level: Level, duration_us: f64) -> Self {
        TimedSegment {
            level,
            duration_us,
            release_us: 0.0,
        }
    }

    /// A pulse followed by a release
    pub fn pulse(level: Level, duration_us: f64, release_us: f64) -> Self {
        TimedSegment {
            level,
            duration_us,
            release_us,
        }
    }

    /// Multiply both durations by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        TimedSegment {
            level: self.level,
            duration_us: self.duration_us * factor,
            release_us: self.release_us * factor,
        }
    }

    /// Time the segment occupies on the wire
    pub fn total_us(&self) -> f64 {
        self.duration_us + self.release_us
    }

    /// The (level, duration) holds making up this segment
    pub fn runs(&self) -> impl Iterator<Item = (Level, f64)> {
        let release = (self.release_us > 0.0).then(|| (self.level.opposite(), self.release_us));
        std::iter::once((self.level, self.duration_us)).chain(release)
    }
}

/// Reject speed factors that would not produce a real waveform
pub fn check_speed_factor(speed_factor: f64) -> Result<()> {
    if !speed_factor.is_finite() || speed_factor <= 0.0 {
        return Err(IebusError::config_error(format!(
            "Speed factor must be a positive number, got {}",
            speed_factor
        )));
    }
    Ok(())
}

/// Turns messages into timed waveforms
#[derive(Debug, Clone)]
pub struct Encoder {
    timing: BusTiming,
}

impl Encoder {
    /// Create an encoder for validated timing
    pub fn new(timing: BusTiming) -> Result<Self> {
        timing.validate()?;
        Ok(Encoder { timing })
    }

    /// Timing this encoder was built with
    pub fn timing(&self) -> &BusTiming {
        &self.timing
    }

    /// The start pulse and its sync gap at 1x speed
    pub fn start_segment(&self) -> TimedSegment {
        TimedSegment::pulse(
            self.timing.polarity.active(),
            self.timing.start_us,
            self.timing.start_sync_us,
        )
    }

    /// One data bit at 1x speed
    pub fn bit_segment(&self, bit: bool) -> TimedSegment {
        let width = self.timing.bit_us(bit);
        TimedSegment::pulse(
            self.timing.polarity.active(),
            width,
            self.timing.bit_period_us - width,
        )
    }

    /// Encode a message as glitch bits, start pulse, frame bits and idle wait
    ///
    /// `glitch_bits` extra 1 bits are placed ahead of the start pulse.
    pub fn encode(
        &self,
        message: &Message,
        speed_factor: f64,
        glitch_bits: usize,
    ) -> Result<Vec<TimedSegment>> {
        check_speed_factor(speed_factor)?;

        let bits = message.to_bits();
        let mut segments = Vec::with_capacity(glitch_bits + bits.len() + 2);
        segments.extend(std::iter::repeat(self.bit_segment(true)).take(glitch_bits));
        segments.push(self.start_segment());
        segments.extend(bits.iter().map(|&bit| self.bit_segment(bit)));
        segments.push(TimedSegment::hold(
            self.timing.polarity.idle(),
            self.timing.wait_us,
        ));

        for segment in &mut segments {
            *segment = segment.scaled(speed_factor);
        }

        debug!(
            message = %message,
            bits = bits.len(),
            glitch_bits,
            speed_factor,
            "encoded frame into {} segments",
            segments.len()
        );
        Ok(segments)
    }
}

/// Deterministic text listing of a waveform
pub fn render(segments: &[TimedSegment]) -> String {
    let mut out = String::new();
    let mut total = 0.0;
    for (i, segment) in segments.iter().enumerate() {
        out.push_str(&format!(
            "{:>6} {:<4} {:>10.3} us",
            i, segment.level, segment.duration_us
        ));
        if segment.release_us > 0.0 {
            out.push_str(&format!(
                "  then {:<4} {:>10.3} us",
                segment.level.opposite(),
                segment.release_us
            ));
        }
        out.push('\n');
        total += segment.total_us();
    }
    out.push_str(&format!("{} segments, {:.3} us total\n", segments.len(), total));
    out
}

/// Flatten segments into merged level holds, as a logic analyzer sees them
///
/// Zero-length holds are dropped and neighbouring holds at the same level merge.
pub fn level_runs(segments: &[TimedSegment]) -> Vec<TimedSegment> {
    let mut runs: Vec<TimedSegment> = Vec::new();
    for (level, duration) in segments.iter().flat_map(|s| s.runs()) {
        if duration <= 0.0 {
            continue;
        }
        match runs.last_mut() {
            Some(last) if last.level == level => last.duration_us += duration,
            _ => runs.push(TimedSegment::hold(level, duration)),
        }
    }
    runs
}

/// Sample a waveform at `clock_hz`; `true` is a high line
///
/// Segment boundaries are rounded on the cumulative time axis, so rounding
/// error does not build up over long waveforms.
pub fn to_samples(segments: &[TimedSegment], clock_hz: u32) -> Vec<bool> {
    let ticks_per_us = clock_hz as f64 / 1e6;
    let mut samples = Vec::new();
    let mut elapsed_us = 0.0;
    for (level, duration) in segments.iter().flat_map(|s| s.runs()) {
        elapsed_us += duration;
        let end = (elapsed_us * ticks_per_us).round().max(0.0) as usize;
        if end > samples.len() {
            samples.resize(end, level.as_bit());
        }
    }
    samples
}

/// Pulse-width decode a waveform into messages, one per start pulse
///
/// Pulses ahead of the first start pulse are ignored, as are frames cut
/// short by an idle gap of at least `timeout_us`. Pass timing scaled by the
/// same speed factor the waveform was encoded with.
pub fn demodulate(segments: &[TimedSegment], timing: &BusTiming) -> Vec<Result<Message>> {
    let active = timing.polarity.active();
    let bit_measure = timing.bit_measure_us();
    let start_measure = timing.start_measure_us();

    let mut frames: Vec<Vec<bool>> = Vec::new();
    let mut open = false;
    for run in level_runs(segments) {
        if run.level != active {
            if run.duration_us >= timing.timeout_us {
                open = false;
            }
            continue;
        }
        if run.duration_us >= start_measure {
            frames.push(Vec::new());
            open = true;
        } else if open {
            if let Some(bits) = frames.last_mut() {
                bits.push(run.duration_us < bit_measure);
            }
        }
    }

    frames
        .iter()
        .enumerate()
        .map(|(i, bits)| {
            Message::from_bits(bits).map_err(|e| IebusError::decode_error(i, e.to_string()))
        })
        .collect()
}
