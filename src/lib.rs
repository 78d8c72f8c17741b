//! # IEBus Bit-Bang Toolkit
//!
//! A Rust library for building, checking and replaying IEBus frames as
//! precisely timed logic waveforms.
//!
//! IEBus is the automotive serial bus with 12-bit master/slave addressing,
//! broadcast frames, odd parity and a per-field ACK. Bits are carried by
//! pulse width rather than by level, so a transmitter with no protocol
//! peripheral can drive the bus by toggling a pin at microsecond resolution.
//! This library provides:
//!
//! - A parity-checked message model with text and binary forms
//! - A timing encoder that turns messages into timed pulse segments
//! - Reconstruction of frames from decoded captures, re-encoded on a fresh timeline
//! - Verbatim replay of raw captured edges
//!
//! ## Features
//!
//! - `serde`: Enable serialization/deserialization support and JSON timing calibration
//!
//! ## Example
//!
//! ```
//! use iebus_bitbang::{BusTiming, Encoder, Message};
//!
//! let message: Message = "- 190 1d0 f 2 60 01".parse()?;
//! let encoder = Encoder::new(BusTiming::default())?;
//! let segments = encoder.encode(&message, 1.0, 0)?;
//! assert_eq!(segments.len(), 1 + message.bit_len() + 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capture;
pub mod core;
pub mod encoding;
pub mod error;
pub mod message;
pub mod options;
pub mod reconstruct;
pub mod replay;
pub mod timing;
pub mod transmit;

pub use capture::{CaptureEvent, RawEdge, Symbol};
pub use crate::core::{parity, Address, FieldKind, Level, Polarity};
pub use error::{IebusError, Result};
pub use message::Message;
pub use options::{Options, OptionsBuilder};
pub use reconstruct::{from_raw_edges, from_symbols, schedule, CapturedFrame, FrameAssembler};
pub use replay::{Replay, Source, Waveform};
pub use timing::{demodulate, render, BusTiming, Encoder, TimedSegment};
pub use transmit::{BitImage, Simulator, Transmitter};

/// IEBus bus constants
pub mod bus {
    /// Transmitter clock in Hz; one tick is one microsecond
    pub const CLOCK_HZ: u32 = 1_000_000;

    /// Nominal mode 2 bit period in microseconds (256 / 6.291456)
    pub const NOMINAL_BIT_PERIOD_US: f64 = 256.0 / 6.291456;

    /// Start pulse width in microseconds
    pub const START_BIT_US: f64 = 170.0;

    /// Idle time after a transmission in microseconds
    pub const TX_WAIT_US: f64 = 88.0;

    /// Idle time that ends a frame in microseconds
    pub const TIMEOUT_US: f64 = 2000.0;

    /// Idle time framing a replayed waveform in microseconds
    pub const IDLE_PADDING_US: f64 = 10_000.0;

    /// Capture channel replayed by default
    pub const DEFAULT_CHANNEL: &str = "RX";
}
