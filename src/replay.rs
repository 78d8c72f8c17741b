//! The three replay modes wired end to end
//!
//! A [`Replay`] validates its timing and options once, then turns a single
//! message, a decoded capture or a raw capture into one padded waveform.

use std::io;

use tracing::debug;

use crate::capture::{CaptureEvent, RawEdge};
use crate::core::Level;
use crate::error::{IebusError, Result};
use crate::message::Message;
use crate::options::Options;
use crate::reconstruct::{from_raw_edges, from_symbols, schedule};
use crate::timing::{render, BusTiming, Encoder, TimedSegment};
use crate::transmit::{Simulator, Transmitter};

/// What to replay
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    /// One message built by hand
    Message(&'a Message),
    /// Decoded protocol symbols, re-encoded with canonical timing
    Decoded(&'a [CaptureEvent]),
    /// Raw edges, replayed verbatim
    Raw(&'a [RawEdge]),
}

/// A finished waveform and what went into it
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Segments in transmission order, idle padding included
    pub segments: Vec<TimedSegment>,
    /// Frames carried by the waveform (0 for raw replay)
    pub frames: usize,
    /// Frames dropped while reassembling a decoded capture
    pub failures: Vec<IebusError>,
}

impl Waveform {
    /// Time the waveform occupies on the wire
    pub fn duration_us(&self) -> f64 {
        self.segments.iter().map(TimedSegment::total_us).sum()
    }

    /// Text listing of the segments
    pub fn render(&self) -> String {
        render(&self.segments)
    }
}

/// Builds and sends waveforms for one set of options
#[derive(Debug, Clone)]
pub struct Replay {
    encoder: Encoder,
    options: Options,
}

impl Replay {
    /// Validate timing and options up front
    pub fn new(timing: BusTiming, options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Replay {
            encoder: Encoder::new(timing)?,
            options,
        })
    }

    /// Options in effect
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Encoder in effect
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Waveform for one message
    pub fn single(&self, message: &Message) -> Result<Waveform> {
        let segments = self.encoder.encode(
            message,
            self.options.speed_factor,
            self.options.glitch_bits,
        )?;
        Ok(self.finish(segments, 1, Vec::new()))
    }

    /// Waveform for every frame that could be reassembled from a decoded capture
    pub fn decoded(&self, events: &[CaptureEvent]) -> Result<Waveform> {
        let mut frames = Vec::new();
        let mut failures = Vec::new();
        for result in from_symbols(events, &self.options.channel)? {
            match result {
                Ok(frame) => frames.push(frame),
                Err(e) => failures.push(e),
            }
        }
        let segments = schedule(&frames, &self.encoder, &self.options)?;
        Ok(self.finish(segments, frames.len(), failures))
    }

    /// Verbatim waveform from raw edges
    pub fn raw(&self, edges: &[RawEdge]) -> Result<Waveform> {
        let segments = from_raw_edges(edges, &self.options.channel, self.options.speed_factor)?;
        Ok(self.finish(segments, 0, Vec::new()))
    }

    /// Build the waveform for any source
    pub fn build(&self, source: Source<'_>) -> Result<Waveform> {
        match source {
            Source::Message(message) => self.single(message),
            Source::Decoded(events) => self.decoded(events),
            Source::Raw(edges) => self.raw(edges),
        }
    }

    /// Build and send a waveform; `simulate` sends the listing to stdout instead
    pub fn run(&self, source: Source<'_>, transmitter: &mut dyn Transmitter) -> Result<Waveform> {
        let waveform = self.build(source)?;
        if self.options.simulate {
            Simulator::new(io::stdout().lock()).transmit(&waveform.segments)?;
        } else {
            transmitter.transmit(&waveform.segments)?;
        }
        Ok(waveform)
    }

    fn finish(
        &self,
        body: Vec<TimedSegment>,
        frames: usize,
        failures: Vec<IebusError>,
    ) -> Waveform {
        let idle_level = self.encoder.timing().polarity.idle();
        let body = trim_idle(&body, idle_level);
        let padding = self.options.idle_padding_us;
        let mut segments = Vec::with_capacity(body.len() + 2);
        if padding > 0.0 {
            let idle = TimedSegment::hold(idle_level, padding);
            segments.push(idle);
            segments.extend_from_slice(body);
            segments.push(idle);
        } else {
            segments.extend_from_slice(body);
        }

        let waveform = Waveform {
            segments,
            frames,
            failures,
        };
        debug!(
            frames,
            failures = waveform.failures.len(),
            segments = waveform.segments.len(),
            duration_us = waveform.duration_us(),
            "built waveform"
        );
        waveform
    }
}

/// Drop plain holds at `idle` (and empty holds) from both ends
///
/// Pulses are kept whole, so a final bit keeps its release.
fn trim_idle(segments: &[TimedSegment], idle: Level) -> &[TimedSegment] {
    let is_idle = |s: &TimedSegment| {
        s.release_us <= 0.0 && (s.level == idle || s.duration_us <= 0.0)
    };
    let start = segments.iter().position(|s| !is_idle(s)).unwrap_or(segments.len());
    let end = segments.iter().rposition(|s| !is_idle(s)).map_or(start, |i| i + 1);
    &segments[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Symbol;
    use crate::core::parity;
    use crate::timing::demodulate;

    struct Recorder {
        sent: Vec<Vec<TimedSegment>>,
    }

    impl Transmitter for Recorder {
        fn transmit(&mut self, segments: &[TimedSegment]) -> Result<()> {
            self.sent.push(segments.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_single_is_padded() -> Result<()> {
        let replay = Replay::new(BusTiming::default(), Options::default())?;
        let msg = Message::parse("- 190 1d0 f 2 60 01")?;
        let waveform = replay.single(&msg)?;

        // the trailing wait hold is idle and gets folded into the padding
        let body = replay.encoder().encode(&msg, 1.0, 0)?;
        let idle = TimedSegment::hold(Level::High, 10_000.0);
        assert_eq!(waveform.segments.first(), Some(&idle));
        assert_eq!(waveform.segments.last(), Some(&idle));
        assert_eq!(
            &waveform.segments[1..waveform.segments.len() - 1],
            &body[..body.len() - 1]
        );
        assert_eq!(waveform.frames, 1);
        Ok(())
    }

    #[test]
    fn test_single_decodes_back() -> Result<()> {
        let options = Options::builder()
            .with_speed_factor(2.0)
            .with_glitch_bits(3)
            .build()?;
        let replay = Replay::new(BusTiming::default(), options)?;
        let msg = Message::parse("B 1ff 000 f 1 45")?;
        let waveform = replay.single(&msg)?;

        let decoded = demodulate(&waveform.segments, &replay.encoder().timing().scaled(2.0));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_ref().ok(), Some(&msg));
        Ok(())
    }

    #[test]
    fn test_decoded_keeps_good_frames() -> Result<()> {
        let options = Options::builder().with_idle_padding_us(0.0).build()?;
        let replay = Replay::new(BusTiming::default(), options)?;
        let ev = |symbol: Symbol, value: u16, t: f64| CaptureEvent::new(symbol, value, t, t + 1.0, "RX");
        let events = vec![
            ev(Symbol::Unicast, 1, 0.0),
            ev(Symbol::Master, 0x190, 1.0),
            ev(Symbol::Slave, 0x1d0, 2.0),
            ev(Symbol::Control, 0xf, 3.0),
            ev(Symbol::Length, 0, 4.0),
            ev(Symbol::Parity, !parity(0, 8) as u16, 5.0),
            ev(Symbol::Broadcast, 0, 5_000.0),
            ev(Symbol::Master, 0x1ff, 5_001.0),
            ev(Symbol::Slave, 0x000, 5_002.0),
            ev(Symbol::Control, 0xf, 5_003.0),
            ev(Symbol::Length, 1, 5_004.0),
            ev(Symbol::Data, 0x45, 5_005.0),
        ];
        let waveform = replay.decoded(&events)?;
        assert_eq!(waveform.frames, 1);
        assert_eq!(waveform.failures.len(), 1);
        assert!(matches!(
            waveform.failures[0],
            IebusError::Decode { frame: 0, .. }
        ));

        let decoded = demodulate(&waveform.segments, replay.encoder().timing());
        assert_eq!(
            decoded[0].as_ref().ok(),
            Some(&Message::parse("B 1ff 000 f 1 45")?)
        );
        Ok(())
    }

    #[test]
    fn test_raw_mode_and_unknown_channel() -> Result<()> {
        let options = Options::builder().with_channel("TX").build()?;
        let replay = Replay::new(BusTiming::default(), options)?;
        let edges = vec![
            RawEdge::new(0.0, "TX", Level::Low),
            RawEdge::new(7.0, "TX", Level::High),
        ];
        let waveform = replay.raw(&edges)?;
        assert_eq!(waveform.segments.len(), 3);
        assert_eq!(waveform.segments[1], TimedSegment::hold(Level::Low, 7.0));
        assert_eq!(waveform.frames, 0);

        let idle_edges = vec![
            RawEdge::new(0.0, "TX", Level::High),
            RawEdge::new(50.0, "TX", Level::Low),
            RawEdge::new(57.0, "TX", Level::High),
            RawEdge::new(90.0, "TX", Level::High),
            RawEdge::new(95.0, "TX", Level::Low),
        ];
        let waveform = replay.raw(&idle_edges)?;
        assert_eq!(waveform.segments.len(), 3);
        assert_eq!(waveform.segments[1], TimedSegment::hold(Level::Low, 7.0));

        let rx_only = vec![RawEdge::new(0.0, "RX", Level::Low)];
        assert!(matches!(replay.raw(&rx_only), Err(IebusError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_run_hands_waveform_to_transmitter() -> Result<()> {
        let replay = Replay::new(BusTiming::default(), Options::default())?;
        let msg = Message::parse("- 190 1d0 f 0")?;
        let mut recorder = Recorder { sent: Vec::new() };
        let waveform = replay.run(Source::Message(&msg), &mut recorder)?;
        assert_eq!(recorder.sent, vec![waveform.segments]);
        Ok(())
    }

    #[test]
    fn test_invalid_setup_fails_fast() {
        let options = Options {
            speed_factor: -1.0,
            ..Options::default()
        };
        assert!(matches!(
            Replay::new(BusTiming::default(), options),
            Err(IebusError::Config(_))
        ));

        let mut timing = BusTiming::default();
        timing.bit1_us = 0.0;
        assert!(Replay::new(timing, Options::default()).is_err());
    }
}
