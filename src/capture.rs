//! Capture records handed over by the ingestion layer
//!
//! Two shapes come in: decoded protocol symbols ([`CaptureEvent`]) and raw
//! logic transitions ([`RawEdge`]). Both are plain values; nothing in the
//! crate mutates them.

use std::str::FromStr;

use crate::core::{FieldKind, Level};
use crate::error::{IebusError, Result};

/// Decoded protocol symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Symbol {
    /// Frame start with broadcast flag
    Broadcast,
    /// Frame start with unicast flag
    Unicast,
    /// Master address
    Master,
    /// Slave address
    Slave,
    /// Control nibble
    Control,
    /// Data length
    Length,
    /// One data byte
    Data,
    /// Parity bit of the preceding field
    Parity,
    /// ACK bit of the preceding field
    Ack,
}

impl Symbol {
    /// Whether this symbol opens a new frame
    pub fn is_frame_start(&self) -> bool {
        matches!(self, Symbol::Broadcast | Symbol::Unicast)
    }

    /// Whether this symbol carries the given field
    pub fn carries(&self, field: FieldKind) -> bool {
        matches!(
            (self, field),
            (Symbol::Master, FieldKind::Master)
                | (Symbol::Slave, FieldKind::Slave)
                | (Symbol::Control, FieldKind::Control)
                | (Symbol::Length, FieldKind::Length)
                | (Symbol::Data, FieldKind::Data(_))
        )
    }
}

impl FromStr for Symbol {
    type Err = IebusError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "broadcast" => Ok(Symbol::Broadcast),
            "unicast" => Ok(Symbol::Unicast),
            "master" => Ok(Symbol::Master),
            "slave" => Ok(Symbol::Slave),
            "control" => Ok(Symbol::Control),
            "length" | "data length" => Ok(Symbol::Length),
            "data" => Ok(Symbol::Data),
            "parity" => Ok(Symbol::Parity),
            "ack" | "nak" => Ok(Symbol::Ack),
            other => Err(IebusError::format_error(format!(
                "Unknown symbol '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Symbol::Broadcast => "Broadcast",
            Symbol::Unicast => "Unicast",
            Symbol::Master => "Master",
            Symbol::Slave => "Slave",
            Symbol::Control => "Control",
            Symbol::Length => "Length",
            Symbol::Data => "Data",
            Symbol::Parity => "Parity",
            Symbol::Ack => "Ack",
        };
        f.pad(name)
    }
}

/// One decoded symbol from a protocol decoder
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureEvent {
    /// Symbol kind
    pub symbol: Symbol,
    /// Field value, or the bit value for flags, parity and ACK
    pub value: u16,
    /// Timestamp of the first sample, microseconds
    pub start_us: f64,
    /// Timestamp of the last sample, microseconds
    pub end_us: f64,
    /// Channel the symbol was decoded on
    pub channel: String,
}

impl CaptureEvent {
    /// Create a new capture event
    pub fn new(
        symbol: Symbol,
        value: u16,
        start_us: f64,
        end_us: f64,
        channel: impl Into<String>,
    ) -> Self {
        CaptureEvent {
            symbol,
            value,
            start_us,
            end_us,
            channel: channel.into(),
        }
    }

    /// Build an event from decoder annotation text
    ///
    /// Accepts `Name` or `Name: value`, where value is `0x`-prefixed hex or
    /// decimal. `Broadcast`, `Unicast`, `ACK` and `NAK` carry their wire bit
    /// implicitly.
    pub fn from_annotation(
        text: &str,
        start_us: f64,
        end_us: f64,
        channel: impl Into<String>,
    ) -> Result<Self> {
        let (name, value) = match text.split_once(':') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (text.trim(), None),
        };
        let symbol: Symbol = name.parse()?;

        let value = match (value, name.to_ascii_lowercase().as_str()) {
            (Some(v), _) => parse_value(v)?,
            (None, "broadcast") | (None, "ack") => 0,
            (None, "unicast") | (None, "nak") => 1,
            (None, _) => {
                return Err(IebusError::format_error(format!(
                    "Annotation '{}' has no value",
                    text
                )))
            }
        };
        Ok(CaptureEvent::new(symbol, value, start_us, end_us, channel))
    }
}

fn parse_value(text: &str) -> Result<u16> {
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| IebusError::format_error(format!("Annotation value '{}': {}", text, e)))
}

/// One logic level transition
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawEdge {
    /// Time of the transition, microseconds
    pub timestamp_us: f64,
    /// Channel the transition was seen on
    pub channel: String,
    /// Level after the transition
    pub level: Level,
}

impl RawEdge {
    /// Create a new edge
    pub fn new(timestamp_us: f64, channel: impl Into<String>, level: Level) -> Self {
        RawEdge {
            timestamp_us,
            channel: channel.into(),
            level,
        }
    }
}

/// Turn a sampled logic trace into edges
///
/// Emits an edge for the first sample, one per level change, and a closing
/// edge one sample period past the end so the final hold keeps its length.
pub fn edges_from_samples(
    channel: &str,
    samples: &[bool],
    sample_rate_hz: u32,
) -> Result<Vec<RawEdge>> {
    if sample_rate_hz == 0 {
        return Err(IebusError::config_error("Sample rate must be positive"));
    }
    let period_us = 1e6 / sample_rate_hz as f64;

    let mut edges = Vec::new();
    let mut previous = None;
    for (i, &sample) in samples.iter().enumerate() {
        if previous != Some(sample) {
            edges.push(RawEdge::new(i as f64 * period_us, channel, sample.into()));
            previous = Some(sample);
        }
    }
    if let Some(last) = previous {
        edges.push(RawEdge::new(
            samples.len() as f64 * period_us,
            channel,
            last.into(),
        ));
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_names() -> Result<()> {
        assert_eq!("Master".parse::<Symbol>()?, Symbol::Master);
        assert_eq!(" data ".parse::<Symbol>()?, Symbol::Data);
        assert_eq!("NAK".parse::<Symbol>()?, Symbol::Ack);
        assert!("Sync".parse::<Symbol>().is_err());
        assert!(Symbol::Unicast.is_frame_start());
        assert!(!Symbol::Data.is_frame_start());
        assert!(Symbol::Data.carries(FieldKind::Data(3)));
        assert!(!Symbol::Slave.carries(FieldKind::Master));
        Ok(())
    }

    #[test]
    fn test_from_annotation() -> Result<()> {
        let event = CaptureEvent::from_annotation("Master: 0x190", 10.0, 500.0, "RX")?;
        assert_eq!(event.symbol, Symbol::Master);
        assert_eq!(event.value, 0x190);
        assert_eq!(event.channel, "RX");

        let event = CaptureEvent::from_annotation("Length: 2", 0.0, 0.0, "RX")?;
        assert_eq!(event.value, 2);

        let event = CaptureEvent::from_annotation("Broadcast", 0.0, 0.0, "RX")?;
        assert_eq!((event.symbol, event.value), (Symbol::Broadcast, 0));

        let event = CaptureEvent::from_annotation("NAK", 0.0, 0.0, "RX")?;
        assert_eq!((event.symbol, event.value), (Symbol::Ack, 1));

        assert!(CaptureEvent::from_annotation("Data", 0.0, 0.0, "RX").is_err());
        assert!(CaptureEvent::from_annotation("Data: 0xZZ", 0.0, 0.0, "RX").is_err());
        assert!(CaptureEvent::from_annotation("Bogus: 1", 0.0, 0.0, "RX").is_err());
        Ok(())
    }

    #[test]
    fn test_edges_from_samples() -> Result<()> {
        let samples = [true, true, false, false, false, true];
        let edges = edges_from_samples("RX", &samples, 1_000_000)?;
        assert_eq!(
            edges,
            vec![
                RawEdge::new(0.0, "RX", Level::High),
                RawEdge::new(2.0, "RX", Level::Low),
                RawEdge::new(5.0, "RX", Level::High),
                RawEdge::new(6.0, "RX", Level::High),
            ]
        );
        assert!(edges_from_samples("RX", &[], 1_000_000)?.is_empty());
        assert!(edges_from_samples("RX", &samples, 0).is_err());
        Ok(())
    }
}
