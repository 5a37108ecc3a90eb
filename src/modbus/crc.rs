// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! CRC-16/MODBUS checksum
//!
//! Reflected polynomial 0xA001, initial value 0xFFFF, no final XOR. The CRC
//! travels low byte first, which makes a CRC run over a complete frame
//! (payload + CRC) come out as zero.

use crc::{Crc, CRC_16_MODBUS};

use super::types::{ModbusError, ModbusResult};

static MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the Modbus CRC-16 of `data`.
///
/// Returns 0xFFFF for an empty slice.
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Check a frame whose last two bytes are its CRC (low byte first).
pub fn crc16_verify(frame: &[u8]) -> bool {
    let Some(split) = frame.len().checked_sub(2) else {
        return false;
    };
    let (payload, trailer) = frame.split_at(split);
    crc16(payload).to_le_bytes() == trailer
}

/// Append the CRC of `buffer[..len]` at `buffer[len..len + 2]`.
///
/// ### Returns
///
/// The new frame length.
///
/// ### Errors
///
/// `BufferOverflow` when there is no room for the two CRC bytes.
pub fn crc16_append(buffer: &mut [u8], len: usize) -> ModbusResult<usize> {
    if len + 2 > buffer.len() {
        return Err(ModbusError::BufferOverflow);
    }
    let crc = crc16(&buffer[..len]);
    buffer[len..len + 2].copy_from_slice(&crc.to_le_bytes());
    Ok(len + 2)
}
