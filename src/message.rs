//! The IEBus message model
//!
//! A [`Message`] is one complete frame: broadcast flag, master and slave
//! addresses, control nibble and up to 255 data bytes. Parity and ACK bits
//! are derived on serialization and checked on parse.
//!
//! The canonical text form is
//! `[B|-] <master:3 hex> <slave:3 hex> <control:1 hex> <len:decimal> <data:2 hex>*`,
//! for example `- 190 1d0 f 2 60 01`.

use std::str::FromStr;

use crate::core::{Address, FieldKind};
use crate::encoding::{frame_bits, frame_byte_len, pack_bits, parse_frame_bits, unpack_bits};
use crate::error::{IebusError, Result};

/// One IEBus frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct Message {
    broadcast: bool,
    master: Address,
    slave: Address,
    control: u8,
    data: Vec<u8>,
}

impl Message {
    /// Largest data length the length field can carry
    pub const MAX_DATA_LEN: usize = 0xFF;

    /// Create a new message, validating every field range
    pub fn new(broadcast: bool, master: u16, slave: u16, control: u8, data: Vec<u8>) -> Result<Self> {
        let message = Message {
            broadcast,
            master: Address::new(master)?,
            slave: Address::new(slave)?,
            control,
            data,
        };
        message.validate()?;
        Ok(message)
    }

    /// Parse the canonical text form
    pub fn parse(text: &str) -> Result<Self> {
        text.parse()
    }

    /// Parse a packed binary frame, checking every parity bit
    ///
    /// The buffer must be exactly as long as the declared data length needs.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let message = parse_frame_bits(&unpack_bits(bytes))?;
        let expected = frame_byte_len(message.data.len());
        if bytes.len() != expected {
            return Err(IebusError::format_error(format!(
                "Inconsistent frame buffer: {} bytes, length {} needs {}",
                bytes.len(),
                message.data.len(),
                expected
            )));
        }
        Ok(message)
    }

    /// Parse an unpacked on-wire bit sequence; trailing bits are ignored
    pub fn from_bits(bits: &[bool]) -> Result<Self> {
        parse_frame_bits(bits)
    }

    /// Serialize to the packed binary frame, unused trailing bits zero
    pub fn to_bytes(&self) -> Vec<u8> {
        pack_bits(&self.to_bits(), false)
    }

    /// Serialize to the on-wire bit sequence, parity and ACK included
    pub fn to_bits(&self) -> Vec<bool> {
        frame_bits(self)
    }

    /// Check field ranges and length consistency
    pub fn validate(&self) -> Result<()> {
        Address::new(self.master.value())?;
        Address::new(self.slave.value())?;
        if self.control as u16 > FieldKind::Control.max_value() {
            return Err(IebusError::format_error(format!(
                "Control 0x{:x} out of range [0x0, 0xf]",
                self.control
            )));
        }
        if self.data.len() > Self::MAX_DATA_LEN {
            return Err(IebusError::format_error(format!(
                "Data length {} exceeds maximum of {}",
                self.data.len(),
                Self::MAX_DATA_LEN
            )));
        }
        Ok(())
    }

    /// Whether this is a broadcast frame
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Master address
    pub fn master(&self) -> Address {
        self.master
    }

    /// Slave address; an opaque value on broadcast frames
    pub fn slave(&self) -> Address {
        self.slave
    }

    /// Control nibble
    pub fn control(&self) -> u8 {
        self.control
    }

    /// Declared data length
    pub fn length(&self) -> u8 {
        self.data.len() as u8
    }

    /// Data bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Data bytes under the common device convention
    ///
    /// Unicast frames conventionally lead with a 0x00 byte, which is skipped.
    pub fn payload(&self) -> &[u8] {
        if self.broadcast {
            &self.data
        } else {
            self.data.get(1..).unwrap_or(&[])
        }
    }

    /// Source and destination device IDs, the first two payload bytes
    ///
    /// Missing bytes read as 0.
    pub fn device_ids(&self) -> (u8, u8) {
        let payload = self.payload();
        (
            payload.first().copied().unwrap_or(0),
            payload.get(1).copied().unwrap_or(0),
        )
    }

    /// Number of bits this frame occupies on the wire
    pub fn bit_len(&self) -> usize {
        crate::encoding::frame_bit_len(self.data.len())
    }
}

fn parse_hex_field(token: &str, field: FieldKind, digits: usize) -> Result<u16> {
    if token.len() != digits || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IebusError::format_error(format!(
            "{} must be exactly {} hex digit(s), got '{}'",
            field, digits, token
        )));
    }
    u16::from_str_radix(token, 16)
        .map_err(|e| IebusError::format_error(format!("{} '{}': {}", field, token, e)))
}

impl FromStr for Message {
    type Err = IebusError;

    fn from_str(text: &str) -> Result<Self> {
        let mut tokens: Vec<&str> = text.split_whitespace().collect();

        if tokens.len() < 5 {
            return Err(IebusError::format_error(format!(
                "Expected at least 5 tokens, got {} in '{}'",
                tokens.len(),
                text
            )));
        }

        let broadcast = match tokens[0] {
            "B" => true,
            "-" => false,
            other => {
                return Err(IebusError::format_error(format!(
                    "Broadcast flag must be 'B' or '-', got '{}'",
                    other
                )))
            }
        };
        let master = parse_hex_field(tokens[1], FieldKind::Master, 3)?;
        let slave = parse_hex_field(tokens[2], FieldKind::Slave, 3)?;
        let control = parse_hex_field(tokens[3], FieldKind::Control, 1)? as u8;

        // A ':' separator is allowed between length and data, either
        // stand-alone or attached to the length
        let length_token = tokens[4].strip_suffix(':').unwrap_or(tokens[4]);
        if tokens.get(5) == Some(&":") && length_token == tokens[4] {
            tokens.remove(5);
        }
        if !length_token.chars().all(|c| c.is_ascii_digit()) {
            return Err(IebusError::format_error(format!(
                "Length must be decimal, got '{}'",
                length_token
            )));
        }
        let length: usize = length_token
            .parse()
            .map_err(|e| IebusError::format_error(format!("Length '{}': {}", length_token, e)))?;
        if length > Message::MAX_DATA_LEN {
            return Err(IebusError::format_error(format!(
                "Length {} exceeds maximum of {}",
                length,
                Message::MAX_DATA_LEN
            )));
        }

        let data_tokens = &tokens[5..];
        if data_tokens.len() != length {
            return Err(IebusError::format_error(format!(
                "Declared length {} but {} data byte(s) given",
                length,
                data_tokens.len()
            )));
        }
        let data = data_tokens
            .iter()
            .enumerate()
            .map(|(n, t)| parse_hex_field(t, FieldKind::Data(n), 2).map(|v| v as u8))
            .collect::<Result<Vec<u8>>>()?;

        Message::new(broadcast, master, slave, control, data)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {:x} {}",
            if self.broadcast { 'B' } else { '-' },
            self.master,
            self.slave,
            self.control,
            self.data.len()
        )?;
        for byte in &self.data {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Message {
    type Error = IebusError;

    fn try_from(text: String) -> Result<Self> {
        text.parse()
    }
}

impl From<Message> for String {
    fn from(message: Message) -> Self {
        message.to_string()
    }
}
