use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::error::{AduParseError, InternalError};

/// Number of bytes needed to pack `count` bits
pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize + 7) / 8
}

/// Pack bits LSB-first: bit k of the sequence lands in byte `k / 8` at
/// position `k % 8`.
pub(crate) fn serialize_bits(cursor: &mut WriteCursor, bits: &[bool]) -> Result<(), InternalError> {
    let mut acc: u8 = 0;
    let mut num_bits: usize = 0;
    for bit in bits {
        if *bit {
            acc |= 1 << num_bits;
        }
        num_bits += 1;
        if num_bits == 8 {
            cursor.store_u8(acc)?;
            acc = 0;
            num_bits = 0;
        }
    }
    if num_bits > 0 {
        cursor.store_u8(acc)?;
    }
    Ok(())
}

/// Unpack `count` bits, consuming exactly `num_bytes_for_bits(count)` bytes
pub(crate) fn parse_bits(cursor: &mut ReadCursor, count: u16) -> Result<Vec<bool>, AduParseError> {
    let bytes = cursor.fetch_bytes(num_bytes_for_bits(count))?;
    let mut bits = Vec::with_capacity(count as usize);
    for k in 0..count as usize {
        bits.push(bytes[k / 8] & (1 << (k % 8)) != 0);
    }
    Ok(bits)
}

/// Write registers as big-endian 16-bit words, one per register, in order
pub(crate) fn serialize_registers(
    cursor: &mut WriteCursor,
    registers: &[u16],
) -> Result<(), InternalError> {
    for value in registers {
        cursor.store_u16_be(*value)?;
    }
    Ok(())
}

/// Read `count` big-endian 16-bit registers
pub(crate) fn parse_registers(
    cursor: &mut ReadCursor,
    count: u16,
) -> Result<Vec<u16>, AduParseError> {
    let mut registers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        registers.push(cursor.fetch_u16_be()?);
    }
    Ok(registers)
}
