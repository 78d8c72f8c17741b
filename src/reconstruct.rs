//! Rebuilding transmittable waveforms from captures
//!
//! Decoded symbol streams are reassembled into [`Message`]s by a small state
//! machine and re-encoded with canonical timing. Raw edge streams are
//! replayed as-is, with no protocol interpretation at all.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::capture::{CaptureEvent, RawEdge, Symbol};
use crate::core::{parity, FieldKind};
use crate::error::{IebusError, Result};
use crate::message::Message;
use crate::options::Options;
use crate::timing::{check_speed_factor, Encoder, TimedSegment};

/// A message reassembled from a capture
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CapturedFrame {
    /// Zero-based frame index within the channel
    pub index: usize,
    /// Channel the frame was captured on
    pub channel: String,
    /// Timestamp of the frame start symbol, microseconds
    pub start_us: f64,
    /// Timestamp of the last symbol, microseconds
    pub end_us: f64,
    /// The message itself
    pub message: Message,
}

/// Frame assembly states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Waiting for a frame start
    Idle,
    /// Inside a frame, expecting the given field next
    Awaiting(FieldKind),
    /// Every field received; only parity and ACK may still follow
    Complete,
    /// Skipping the rest of a failed frame
    Discarding,
}

#[derive(Debug)]
struct PartialFrame {
    index: usize,
    broadcast: bool,
    start_us: f64,
    end_us: f64,
    master: u16,
    slave: u16,
    control: u8,
    length: usize,
    data: Vec<u8>,
    // field whose parity bit may still arrive
    last: Option<(FieldKind, u16)>,
}

/// Groups a flat symbol stream into frames
#[derive(Debug)]
pub struct FrameAssembler {
    channel: String,
    state: AssemblerState,
    partial: Option<PartialFrame>,
    frames_seen: usize,
}

impl FrameAssembler {
    /// Create an assembler for one channel
    pub fn new(channel: impl Into<String>) -> Self {
        FrameAssembler {
            channel: channel.into(),
            state: AssemblerState::Idle,
            partial: None,
            frames_seen: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Feed the next symbol; returns a frame result when one is finished
    pub fn feed(&mut self, event: &CaptureEvent) -> Option<Result<CapturedFrame>> {
        if event.symbol.is_frame_start() {
            let finished = self.flush();
            self.begin(event);
            return finished;
        }

        match self.state {
            AssemblerState::Idle | AssemblerState::Discarding => None,
            AssemblerState::Awaiting(field) => match event.symbol {
                Symbol::Parity => self.check_parity(event),
                Symbol::Ack => self.touch(event),
                symbol if symbol.carries(field) => self.accept(field, event),
                symbol => self.fail(format!("expected {}, got {}", field, symbol)),
            },
            AssemblerState::Complete => match event.symbol {
                Symbol::Parity => self.check_parity(event),
                Symbol::Ack => self.touch(event),
                symbol => self.fail(format!("unexpected {} after final field", symbol)),
            },
        }
    }

    /// End of stream; returns the last frame if one was open
    pub fn finish(&mut self) -> Option<Result<CapturedFrame>> {
        self.flush()
    }

    fn begin(&mut self, event: &CaptureEvent) {
        self.partial = Some(PartialFrame {
            index: self.frames_seen,
            broadcast: event.symbol == Symbol::Broadcast,
            start_us: event.start_us,
            end_us: event.end_us,
            master: 0,
            slave: 0,
            control: 0,
            length: 0,
            data: Vec::new(),
            last: None,
        });
        self.frames_seen += 1;
        self.state = AssemblerState::Awaiting(FieldKind::Master);
    }

    fn touch(&mut self, event: &CaptureEvent) -> Option<Result<CapturedFrame>> {
        if let Some(partial) = self.partial.as_mut() {
            partial.end_us = partial.end_us.max(event.end_us);
        }
        None
    }

    fn accept(&mut self, field: FieldKind, event: &CaptureEvent) -> Option<Result<CapturedFrame>> {
        if event.value > field.max_value() {
            return self.fail(format!("{} value 0x{:x} out of range", field, event.value));
        }
        let partial = self.partial.as_mut()?;
        partial.end_us = partial.end_us.max(event.end_us);
        partial.last = Some((field, event.value));

        let next = match field {
            FieldKind::Master => {
                partial.master = event.value;
                AssemblerState::Awaiting(FieldKind::Slave)
            }
            FieldKind::Slave => {
                partial.slave = event.value;
                AssemblerState::Awaiting(FieldKind::Control)
            }
            FieldKind::Control => {
                partial.control = event.value as u8;
                AssemblerState::Awaiting(FieldKind::Length)
            }
            FieldKind::Length => {
                partial.length = event.value as usize;
                if partial.length == 0 {
                    AssemblerState::Complete
                } else {
                    AssemblerState::Awaiting(FieldKind::Data(0))
                }
            }
            FieldKind::Data(n) => {
                partial.data.push(event.value as u8);
                if n + 1 == partial.length {
                    AssemblerState::Complete
                } else {
                    AssemblerState::Awaiting(FieldKind::Data(n + 1))
                }
            }
        };
        self.state = next;
        None
    }

    fn check_parity(&mut self, event: &CaptureEvent) -> Option<Result<CapturedFrame>> {
        let last = self.partial.as_mut().and_then(|p| p.last.take());
        let Some((field, value)) = last else {
            return self.fail("parity bit without a preceding field".to_string());
        };
        if event.value > 1 {
            return self.fail(format!("parity value {} is not a bit", event.value));
        }
        if parity(value, field.width()) != (event.value == 1) {
            return self.fail(format!("bad parity on {} (value 0x{:x})", field, value));
        }
        self.touch(event)
    }

    fn fail(&mut self, reason: String) -> Option<Result<CapturedFrame>> {
        let index = self.partial.take().map(|p| p.index).unwrap_or(self.frames_seen);
        self.state = AssemblerState::Discarding;
        warn!(channel = %self.channel, frame = index, "dropping frame: {}", reason);
        Some(Err(IebusError::decode_error(index, reason)))
    }

    fn flush(&mut self) -> Option<Result<CapturedFrame>> {
        let state = std::mem::replace(&mut self.state, AssemblerState::Idle);
        let partial = self.partial.take()?;
        match state {
            AssemblerState::Complete => {
                let frame = Message::new(
                    partial.broadcast,
                    partial.master,
                    partial.slave,
                    partial.control,
                    partial.data,
                )
                .map(|message| CapturedFrame {
                    index: partial.index,
                    channel: self.channel.clone(),
                    start_us: partial.start_us,
                    end_us: partial.end_us,
                    message,
                })
                .map_err(|e| IebusError::decode_error(partial.index, e.to_string()));
                Some(frame)
            }
            AssemblerState::Awaiting(field) => {
                let reason = format!("frame ended while awaiting {}", field);
                warn!(channel = %self.channel, frame = partial.index, "dropping frame: {}", reason);
                Some(Err(IebusError::decode_error(partial.index, reason)))
            }
            AssemblerState::Idle | AssemblerState::Discarding => None,
        }
    }
}

/// Reassemble the frames of one channel from decoded symbols
///
/// Each frame yields its own result, so one corrupt frame does not stop the
/// rest. Fails outright only when the channel does not appear at all.
pub fn from_symbols(
    events: &[CaptureEvent],
    channel: &str,
) -> Result<Vec<Result<CapturedFrame>>> {
    let mut selected: Vec<&CaptureEvent> =
        events.iter().filter(|e| e.channel == channel).collect();
    if selected.is_empty() {
        return Err(IebusError::config_error(format!(
            "Channel '{}' not present in capture",
            channel
        )));
    }
    selected.sort_by(|a, b| a.start_us.total_cmp(&b.start_us));

    let mut assembler = FrameAssembler::new(channel);
    let mut frames: Vec<Result<CapturedFrame>> =
        selected.into_iter().filter_map(|e| assembler.feed(e)).collect();
    frames.extend(assembler.finish());

    debug!(
        channel,
        frames = frames.len(),
        failed = frames.iter().filter(|f| f.is_err()).count(),
        "reassembled capture"
    );
    Ok(frames)
}

/// Replay raw edges verbatim as level holds
///
/// Each edge holds its level until the next one. The last edge has no
/// successor and produces no segment.
pub fn from_raw_edges(
    edges: &[RawEdge],
    channel: &str,
    speed_factor: f64,
) -> Result<Vec<TimedSegment>> {
    check_speed_factor(speed_factor)?;
    let mut selected: Vec<&RawEdge> = edges.iter().filter(|e| e.channel == channel).collect();
    if selected.is_empty() {
        return Err(IebusError::config_error(format!(
            "Channel '{}' not present in capture",
            channel
        )));
    }
    selected.sort_by(|a, b| a.timestamp_us.total_cmp(&b.timestamp_us));

    Ok(selected
        .windows(2)
        .map(|pair| {
            let duration = pair[1].timestamp_us - pair[0].timestamp_us;
            TimedSegment::hold(pair[0].level, duration * speed_factor)
        })
        .collect())
}

/// Lay re-encoded frames out on one timeline
///
/// Frames go at their captured offset from the first frame, or every
/// `regular_interval` ticks when that is set. A frame that would start
/// before the previous one has finished is pushed back to follow it.
/// Glitch bits are sent once, ahead of the first frame, and offsets are
/// measured from the end of them.
pub fn schedule(
    frames: &[CapturedFrame],
    encoder: &Encoder,
    options: &Options,
) -> Result<Vec<TimedSegment>> {
    options.validate()?;
    let speed = options.speed_factor;
    let idle = encoder.timing().polarity.idle();
    let origin = frames
        .iter()
        .map(|f| f.start_us)
        .fold(f64::INFINITY, f64::min);

    // Glitch bits precede the timeline
    let mut segments: Vec<TimedSegment> =
        std::iter::repeat(encoder.bit_segment(true).scaled(speed))
            .take(options.glitch_bits)
            .collect();
    let mut cursor_us = 0.0;
    for (i, frame) in frames.iter().enumerate() {
        let offset_us = match options.regular_interval_us() {
            Some(interval) => i as f64 * interval,
            None => frame.start_us - origin,
        } * speed;

        if offset_us > cursor_us {
            segments.push(TimedSegment::hold(idle, offset_us - cursor_us));
            cursor_us = offset_us;
        } else if offset_us < cursor_us {
            warn!(
                frame = frame.index,
                overlap_us = cursor_us - offset_us,
                "frame collides with previous one, delaying it"
            );
        }

        let encoded = encoder.encode(&frame.message, speed, 0)?;
        cursor_us += encoded.iter().map(TimedSegment::total_us).sum::<f64>();
        segments.extend(encoded);
    }
    Ok(segments)
}

/// Drop RX frames heard in the same millisecond as a TX frame
pub fn suppress_echoes(rx: &[CapturedFrame], tx: &[CapturedFrame]) -> Vec<CapturedFrame> {
    let millis = |frame: &CapturedFrame| (frame.start_us / 1000.0).floor() as i64;
    let sent: HashSet<i64> = tx.iter().map(millis).collect();
    rx.iter()
        .filter(|frame| !sent.contains(&millis(frame)))
        .cloned()
        .collect()
}
