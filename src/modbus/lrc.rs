// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! LRC checksum and hex conversion for Modbus ASCII

use super::types::{ModbusError, ModbusResult};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Two's complement of the 8-bit sum of `data`.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, &byte| sum.wrapping_add(byte))
        .wrapping_neg()
}

/// Verify a run of bytes whose last byte is its LRC.
pub fn lrc_verify(data: &[u8]) -> bool {
    data.len() >= 2 && data.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte)) == 0
}

/// Encode a byte as two upper-case hex characters.
pub fn byte_to_ascii(byte: u8) -> [u8; 2] {
    [
        HEX_DIGITS[usize::from(byte >> 4)],
        HEX_DIGITS[usize::from(byte & 0x0F)],
    ]
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Decode two hex characters (either case) into a byte.
///
/// ### Errors
///
/// `Frame` when either character is not a hex digit.
pub fn ascii_to_byte(high: u8, low: u8) -> ModbusResult<u8> {
    match (hex_value(high), hex_value(low)) {
        (Some(h), Some(l)) => Ok((h << 4) | l),
        _ => Err(ModbusError::Frame),
    }
}

/// Hex-encode `binary` into `ascii`, returning the number of characters written.
///
/// ### Errors
///
/// `BufferOverflow` when `ascii` cannot hold two characters per byte.
pub fn binary_to_ascii(binary: &[u8], ascii: &mut [u8]) -> ModbusResult<usize> {
    let needed = binary.len() * 2;
    if ascii.len() < needed {
        return Err(ModbusError::BufferOverflow);
    }
    for (pair, &byte) in ascii.chunks_exact_mut(2).zip(binary) {
        pair.copy_from_slice(&byte_to_ascii(byte));
    }
    Ok(needed)
}

/// Decode an even-length hex string into `binary`, returning the byte count.
///
/// ### Errors
///
/// * `Frame` for an odd or empty input, or a non-hex character
/// * `BufferOverflow` when `binary` is too small
pub fn ascii_to_binary(ascii: &[u8], binary: &mut [u8]) -> ModbusResult<usize> {
    if ascii.is_empty() || ascii.len() % 2 != 0 {
        return Err(ModbusError::Frame);
    }
    let count = ascii.len() / 2;
    if binary.len() < count {
        return Err(ModbusError::BufferOverflow);
    }
    for (slot, pair) in binary.iter_mut().zip(ascii.chunks_exact(2)) {
        *slot = ascii_to_byte(pair[0], pair[1])?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lrc_vectors() {
        assert_eq!(lrc(&[]), 0x00);
        assert_eq!(lrc(&[0x01]), 0xFF);
        assert_eq!(lrc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xF2);
        assert_eq!(lrc(&[0x01, 0x05, 0x00, 0xAC, 0xFF, 0x00]), 0x55);
        assert_eq!(lrc(&[0xFF, 0xFF, 0xFF, 0xFF]), 0x04);
        assert_eq!(lrc(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03]), 0xF5);
    }

    #[test]
    fn test_lrc_verify() {
        assert!(lrc_verify(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xF2]));
        assert!(!lrc_verify(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xFF]));
        assert!(lrc_verify(&[0x01, 0xFF]));
        assert!(!lrc_verify(&[0x00]));
    }

    #[test]
    fn test_byte_to_ascii() {
        assert_eq!(&byte_to_ascii(0xAB), b"AB");
        assert_eq!(&byte_to_ascii(0x00), b"00");
        assert_eq!(&byte_to_ascii(0x5C), b"5C");
    }

    #[test]
    fn test_ascii_to_byte_accepts_both_cases() {
        assert_eq!(ascii_to_byte(b'A', b'B'), Ok(0xAB));
        assert_eq!(ascii_to_byte(b'a', b'b'), Ok(0xAB));
        assert_eq!(ascii_to_byte(b'a', b'B'), Ok(0xAB));
        assert_eq!(ascii_to_byte(b'G', b'H'), Err(ModbusError::Frame));
        assert_eq!(ascii_to_byte(b' ', b'0'), Err(ModbusError::Frame));
    }

    #[test]
    fn test_every_byte_survives_hex_encoding() {
        for b in 0..=255u8 {
            let [h, l] = byte_to_ascii(b);
            assert_eq!(ascii_to_byte(h, l), Ok(b));
        }
    }

    #[test]
    fn test_binary_ascii_conversion() {
        let mut ascii = [0u8; 20];
        let n = binary_to_ascii(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A], &mut ascii).unwrap();
        assert_eq!(&ascii[..n], b"01030000000A");

        let mut binary = [0u8; 10];
        let n = ascii_to_binary(b"0103ABcd", &mut binary).unwrap();
        assert_eq!(&binary[..n], &[0x01, 0x03, 0xAB, 0xCD]);

        let mut small = [0u8; 5];
        assert_eq!(
            binary_to_ascii(&[1, 2, 3, 4, 5, 6], &mut small),
            Err(ModbusError::BufferOverflow)
        );
        assert_eq!(ascii_to_binary(b"01030", &mut binary), Err(ModbusError::Frame));
    }
}
