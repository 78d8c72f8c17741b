//! Bit-level frame layout and MSB-first bit packing for IEBus

use bitfield::bitfield;

use crate::core::{parity, Address, FieldKind};
use crate::error::{IebusError, Result};
use crate::message::Message;

/// Bits in the fixed part of a frame (flag, addresses, control, length)
pub const HEADER_BITS: usize = 45;

/// Bits per data field: 8 data + parity + ACK
pub const DATA_FIELD_BITS: usize = 10;

/// ACK placeholder transmitted by a sender (NAK, line left released)
pub const ACK_PLACEHOLDER: bool = true;

bitfield! {
    /// The 45-bit frame header, bit 44 first on the wire
    pub struct HeaderBits(u64);
    impl Debug;
    /// 1 = unicast, 0 = broadcast
    pub unicast, set_unicast: 44;
    pub u16, master, set_master: 43, 32;
    pub master_parity, set_master_parity: 31;
    pub master_ack, set_master_ack: 30;
    pub u16, slave, set_slave: 29, 18;
    pub slave_parity, set_slave_parity: 17;
    pub slave_ack, set_slave_ack: 16;
    pub u8, control, set_control: 15, 12;
    pub control_parity, set_control_parity: 11;
    pub control_ack, set_control_ack: 10;
    pub u8, length, set_length: 9, 2;
    pub length_parity, set_length_parity: 1;
    pub length_ack, set_length_ack: 0;
}

bitfield! {
    /// One 10-bit data field, bit 9 first on the wire
    pub struct DataFieldBits(u16);
    impl Debug;
    pub u8, value, set_value: 9, 2;
    pub parity, set_parity: 1;
    pub ack, set_ack: 0;
}

impl HeaderBits {
    fn from_message(message: &Message) -> Self {
        let mut header = HeaderBits(0);
        let master = message.master().value();
        let slave = message.slave().value();
        let control = message.control();
        let length = message.length();

        header.set_unicast(!message.is_broadcast());
        header.set_master(master);
        header.set_master_parity(parity(master, Address::BITS));
        header.set_master_ack(ACK_PLACEHOLDER);
        header.set_slave(slave);
        header.set_slave_parity(parity(slave, Address::BITS));
        header.set_slave_ack(ACK_PLACEHOLDER);
        header.set_control(control);
        header.set_control_parity(parity(control as u16, 4));
        header.set_control_ack(ACK_PLACEHOLDER);
        header.set_length(length);
        header.set_length_parity(parity(length as u16, 8));
        header.set_length_ack(ACK_PLACEHOLDER);
        header
    }

    fn check_parity(&self) -> Result<()> {
        let checks = [
            (FieldKind::Master, self.master(), self.master_parity()),
            (FieldKind::Slave, self.slave(), self.slave_parity()),
            (FieldKind::Control, self.control() as u16, self.control_parity()),
            (FieldKind::Length, self.length() as u16, self.length_parity()),
        ];
        for (field, value, stored) in checks {
            check_field_parity(field, value, stored)?;
        }
        Ok(())
    }
}

impl DataFieldBits {
    fn from_byte(byte: u8) -> Self {
        let mut field = DataFieldBits(0);
        field.set_value(byte);
        field.set_parity(parity(byte as u16, 8));
        field.set_ack(ACK_PLACEHOLDER);
        field
    }
}

fn check_field_parity(field: FieldKind, value: u16, stored: bool) -> Result<()> {
    if parity(value, field.width()) != stored {
        return Err(IebusError::format_error(format!(
            "Bad parity on {} (value 0x{:x})",
            field, value
        )));
    }
    Ok(())
}

/// Total frame length in bits for `data_len` data bytes
pub fn frame_bit_len(data_len: usize) -> usize {
    HEADER_BITS + DATA_FIELD_BITS * data_len
}

/// Total frame length in whole bytes for `data_len` data bytes
pub fn frame_byte_len(data_len: usize) -> usize {
    frame_bit_len(data_len).div_ceil(8)
}

/// Append the low `width` bits of `value`, most significant first
pub fn push_bits(out: &mut Vec<bool>, value: u64, width: usize) {
    for i in (0..width).rev() {
        out.push((value >> i) & 1 != 0);
    }
}

/// Read an MSB-first bit slice back into an integer
pub fn read_bits(bits: &[bool]) -> u64 {
    bits.iter().fold(0u64, |acc, &bit| (acc << 1) | bit as u64)
}

/// Pack bits MSB-first, padding the final byte with `pad`
pub fn pack_bits(bits: &[bool], pad: bool) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            let mut byte = 0u8;
            for i in 0..8 {
                let bit = chunk.get(i).copied().unwrap_or(pad);
                byte = (byte << 1) | bit as u8;
            }
            byte
        })
        .collect()
}

/// Unpack bytes into MSB-first bits
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        push_bits(&mut bits, byte as u64, 8);
    }
    bits
}

/// Serialize a message into its on-wire bit sequence
pub fn frame_bits(message: &Message) -> Vec<bool> {
    let mut bits = Vec::with_capacity(frame_bit_len(message.data().len()));
    push_bits(&mut bits, HeaderBits::from_message(message).0, HEADER_BITS);
    for &byte in message.data() {
        push_bits(
            &mut bits,
            DataFieldBits::from_byte(byte).0 as u64,
            DATA_FIELD_BITS,
        );
    }
    bits
}

/// Rebuild a message from its on-wire bit sequence, checking every parity bit
///
/// Bits past the end of the frame are ignored.
pub fn parse_frame_bits(bits: &[bool]) -> Result<Message> {
    if bits.len() < HEADER_BITS {
        return Err(IebusError::format_error(format!(
            "Truncated frame: {} bits, header needs {}",
            bits.len(),
            HEADER_BITS
        )));
    }
    let header = HeaderBits(read_bits(&bits[..HEADER_BITS]));
    header.check_parity()?;

    let data_len = header.length() as usize;
    let needed = frame_bit_len(data_len);
    if bits.len() < needed {
        return Err(IebusError::format_error(format!(
            "Truncated frame: {} bits, length {} needs {}",
            bits.len(),
            data_len,
            needed
        )));
    }

    let mut data = Vec::with_capacity(data_len);
    for (n, chunk) in bits[HEADER_BITS..needed]
        .chunks(DATA_FIELD_BITS)
        .enumerate()
    {
        let field = DataFieldBits(read_bits(chunk) as u16);
        check_field_parity(FieldKind::Data(n), field.value() as u16, field.parity())?;
        data.push(field.value());
    }

    Message::new(
        !header.unicast(),
        header.master(),
        header.slave(),
        header.control(),
        data,
    )
}
