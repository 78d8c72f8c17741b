//! Core types and structures for the IEBus protocol

use crate::error::{IebusError, Result};

/// Logic level of the bus line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Level {
    /// Line low
    Low,
    /// Line high
    High,
}

impl Level {
    /// The other level
    pub fn opposite(&self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    /// Sample value of this level (`true` = high)
    pub fn as_bit(&self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Low => f.pad("LOW"),
            Level::High => f.pad("HIGH"),
        }
    }
}

/// Which level the released bus rests at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Polarity {
    /// Idle high, pulses pull the line low
    #[default]
    IdleHigh,
    /// Idle low, pulses drive the line high
    IdleLow,
}

impl Polarity {
    /// Level of the released (idle) line
    pub fn idle(&self) -> Level {
        match self {
            Polarity::IdleHigh => Level::High,
            Polarity::IdleLow => Level::Low,
        }
    }

    /// Level driven during a pulse
    pub fn active(&self) -> Level {
        self.idle().opposite()
    }
}

/// 12-bit master or slave unit address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address(u16);

impl Address {
    /// Maximum address value
    pub const MAX: u16 = 0xFFF;
    /// Width on the wire
    pub const BITS: u8 = 12;

    /// Create a new address, validating it fits in 12 bits
    pub fn new(addr: u16) -> Result<Self> {
        if addr > Self::MAX {
            return Err(IebusError::format_error(format!(
                "Address 0x{:x} out of range [0x000, 0x{:03x}]",
                addr,
                Self::MAX
            )));
        }
        Ok(Address(addr))
    }

    /// Get the raw address value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&format!("{:03x}", self.0))
    }
}

/// A parity-protected field of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Master address
    Master,
    /// Slave address
    Slave,
    /// Control nibble
    Control,
    /// Data length
    Length,
    /// The nth data byte
    Data(usize),
}

impl FieldKind {
    /// Number of value bits, excluding parity and ACK
    pub fn width(&self) -> u8 {
        match self {
            FieldKind::Master | FieldKind::Slave => Address::BITS,
            FieldKind::Control => 4,
            FieldKind::Length | FieldKind::Data(_) => 8,
        }
    }

    /// Largest value the field can hold
    pub fn max_value(&self) -> u16 {
        (1u16 << self.width()) - 1
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Master => f.pad("Master"),
            FieldKind::Slave => f.pad("Slave"),
            FieldKind::Control => f.pad("Control"),
            FieldKind::Length => f.pad("Length"),
            FieldKind::Data(n) => f.pad(&format!("Data {}", n)),
        }
    }
}

/// Odd parity bit for the low `width` bits of `value`
///
/// The returned bit makes the number of ones in field + parity odd.
pub fn parity(value: u16, width: u8) -> bool {
    let mask = if width >= 16 {
        u16::MAX
    } else {
        (1u16 << width) - 1
    };
    (value & mask).count_ones() % 2 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_creation() {
        assert!(Address::new(0).is_ok());
        assert!(Address::new(0xFFF).is_ok());
        assert!(matches!(
            Address::new(0x1000),
            Err(IebusError::Format(_))
        ));
    }

    #[test]
    fn test_address_display() -> Result<()> {
        assert_eq!(Address::new(0x1d0)?.to_string(), "1d0");
        assert_eq!(Address::new(0x5)?.to_string(), "005");
        Ok(())
    }

    #[test]
    fn test_parity() {
        assert!(parity(0x000, 12)); // no ones → parity 1
        assert!(!parity(0x001, 12));
        assert!(parity(0x0F, 4));
        assert!(!parity(0x190, 12)); // 0001 1001 0000 → 3 ones
        // bits above the width are ignored
        assert_eq!(parity(0x1F, 4), parity(0x0F, 4));
    }

    #[test]
    fn test_display_honours_width() -> Result<()> {
        assert_eq!(format!("{:<4}|", Level::Low), "LOW |");
        assert_eq!(format!("{:>5}", Level::High), " HIGH");
        assert_eq!(format!("{:<8}|", FieldKind::Data(3)), "Data 3  |");
        assert_eq!(format!("{:>5}", Address::new(0x1d)?), "  01d");
        Ok(())
    }

    #[test]
    fn test_polarity_levels() {
        assert_eq!(Polarity::IdleHigh.idle(), Level::High);
        assert_eq!(Polarity::IdleHigh.active(), Level::Low);
        assert_eq!(Polarity::IdleLow.active(), Level::High);
    }

    #[test]
    fn test_field_widths() {
        assert_eq!(FieldKind::Master.max_value(), 0xFFF);
        assert_eq!(FieldKind::Control.max_value(), 0xF);
        assert_eq!(FieldKind::Data(4).max_value(), 0xFF);
        assert_eq!(FieldKind::Data(4).to_string(), "Data 4");
    }

    mod properties {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parity_makes_total_odd(value in 0u16..=0xFFF, width in 1u8..=12) {
                let masked = value & ((1u16 << width) - 1);
                let total = masked.count_ones() + parity(value, width) as u32;
                prop_assert_eq!(total % 2, 1);
            }
        }
    }
}
