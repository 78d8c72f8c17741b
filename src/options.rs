//! Per-call replay options

use crate::bus;
use crate::error::{IebusError, Result};
use crate::timing::check_speed_factor;

/// Options shared by the encoder and capture reconstructor entry points
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// Duration multiplier; 2.0 is half speed
    pub speed_factor: f64,
    /// Extra 1 bits sent ahead of the first start pulse
    pub glitch_bits: usize,
    /// Fixed frame spacing in bus clock ticks; 0 keeps captured spacing
    pub regular_interval: u64,
    /// Capture channel to replay
    pub channel: String,
    /// Render instead of transmitting
    pub simulate: bool,
    /// Idle time framing the whole waveform on each side
    pub idle_padding_us: f64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            speed_factor: 1.0,
            glitch_bits: 0,
            regular_interval: 0,
            channel: bus::DEFAULT_CHANNEL.to_string(),
            simulate: false,
            idle_padding_us: bus::IDLE_PADDING_US,
        }
    }
}

impl Options {
    /// Start building options from the defaults
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// Fail fast on parameters no waveform can be built from
    pub fn validate(&self) -> Result<()> {
        check_speed_factor(self.speed_factor)?;
        if self.channel.trim().is_empty() {
            return Err(IebusError::config_error("Channel name must not be empty"));
        }
        if !self.idle_padding_us.is_finite() || self.idle_padding_us < 0.0 {
            return Err(IebusError::config_error(format!(
                "Idle padding must be zero or positive, got {}",
                self.idle_padding_us
            )));
        }
        Ok(())
    }

    /// Fixed frame spacing in microseconds at 1x speed, if set
    pub fn regular_interval_us(&self) -> Option<f64> {
        (self.regular_interval > 0)
            .then(|| self.regular_interval as f64 * 1e6 / bus::CLOCK_HZ as f64)
    }
}

/// Builder for [`Options`]
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options
    pub fn new() -> Self {
        OptionsBuilder::default()
    }

    /// Set the speed factor
    pub fn with_speed_factor(mut self, speed_factor: f64) -> Self {
        self.options.speed_factor = speed_factor;
        self
    }

    /// Set the number of glitch bits
    pub fn with_glitch_bits(mut self, glitch_bits: usize) -> Self {
        self.options.glitch_bits = glitch_bits;
        self
    }

    /// Set the fixed frame spacing in bus clock ticks
    pub fn with_regular_interval(mut self, ticks: u64) -> Self {
        self.options.regular_interval = ticks;
        self
    }

    /// Set the capture channel
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.options.channel = channel.into();
        self
    }

    /// Render instead of transmitting
    pub fn with_simulate(mut self, simulate: bool) -> Self {
        self.options.simulate = simulate;
        self
    }

    /// Set the idle padding on each side of the waveform
    pub fn with_idle_padding_us(mut self, padding_us: f64) -> Self {
        self.options.idle_padding_us = padding_us;
        self
    }

    /// Validate and build the options
    pub fn build(self) -> Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() -> Result<()> {
        let options = Options::builder().build()?;
        assert_eq!(options.speed_factor, 1.0);
        assert_eq!(options.glitch_bits, 0);
        assert_eq!(options.channel, "RX");
        assert!(!options.simulate);
        assert_eq!(options.regular_interval_us(), None);
        Ok(())
    }

    #[test]
    fn test_builder() -> Result<()> {
        let options = Options::builder()
            .with_speed_factor(2.0)
            .with_glitch_bits(100)
            .with_regular_interval(50_000)
            .with_channel("TX")
            .with_simulate(true)
            .with_idle_padding_us(0.0)
            .build()?;
        assert_eq!(options.glitch_bits, 100);
        assert_eq!(options.channel, "TX");
        assert_eq!(options.regular_interval_us(), Some(50_000.0));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(
            Options::builder().with_speed_factor(0.0).build(),
            Err(IebusError::Config(_))
        ));
        assert!(Options::builder().with_speed_factor(-2.0).build().is_err());
        assert!(Options::builder().with_channel(" ").build().is_err());
        assert!(Options::builder().with_idle_padding_us(-1.0).build().is_err());
    }
}
