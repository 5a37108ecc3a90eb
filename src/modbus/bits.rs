// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bit packing for coil and discrete-input payloads
//!
//! Modbus packs bit values LSB first: bit `i` lands in byte `i / 8`, bit
//! position `i % 8`.

const BITS_PER_BYTE: usize = 8;

/// Number of bytes needed to carry `bits` packed values.
pub const fn packed_len(bits: usize) -> usize {
    (bits + BITS_PER_BYTE - 1) / BITS_PER_BYTE
}

/// Pack `bits` into `bytes`, clearing every unused high bit of the last byte.
///
/// Returns the number of bytes written, or `None` if `bytes` is too small.
pub fn pack_bits(bits: &[bool], bytes: &mut [u8]) -> Option<usize> {
    let len = packed_len(bits.len());
    let bytes = bytes.get_mut(..len)?;
    bytes.fill(0);
    for (index, _) in bits.iter().enumerate().filter(|(_, &on)| on) {
        bytes[index / BITS_PER_BYTE] |= 1 << (index % BITS_PER_BYTE);
    }
    Some(len)
}

/// Unpack `bits.len()` values from `bytes`.
///
/// Returns `None` if `bytes` does not hold enough packed values.
pub fn unpack_bits(bytes: &[u8], bits: &mut [bool]) -> Option<()> {
    if bytes.len() < packed_len(bits.len()) {
        return None;
    }
    for (index, bit) in bits.iter_mut().enumerate() {
        *bit = get_bit(bytes, index);
    }
    Some(())
}

/// Read bit `index` from a packed byte slice; out-of-range bits read as off.
pub fn get_bit(bytes: &[u8], index: usize) -> bool {
    bytes
        .get(index / BITS_PER_BYTE)
        .is_some_and(|byte| byte & (1 << (index % BITS_PER_BYTE)) != 0)
}

/// Set or clear bit `index` of a 16-bit word.
pub fn with_bit(word: u16, index: u8, on: bool) -> u16 {
    let mask = 1u16 << (index & 0x0F);
    if on {
        word | mask
    } else {
        word & !mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_len() {
        assert_eq!(packed_len(0), 0);
        assert_eq!(packed_len(1), 1);
        assert_eq!(packed_len(8), 1);
        assert_eq!(packed_len(9), 2);
        assert_eq!(packed_len(2000), 250);
    }

    #[test]
    fn test_pack_lsb_first() {
        let bits = [true, false, true, true, false, false, true, true, true, false];
        let mut bytes = [0xFFu8; 4];
        assert_eq!(pack_bits(&bits, &mut bytes), Some(2));
        assert_eq!(bytes[0], 0xCD);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 0xFF);
    }

    #[test]
    fn test_pack_too_small() {
        let mut bytes = [0u8; 1];
        assert_eq!(pack_bits(&[false; 9], &mut bytes), None);
    }

    #[test]
    fn test_unpack() {
        let mut bits = [false; 10];
        unpack_bits(&[0xCD, 0x01], &mut bits).unwrap();
        assert_eq!(
            bits,
            [true, false, true, true, false, false, true, true, true, false]
        );
        assert!(unpack_bits(&[0xCD], &mut bits).is_none());
    }

    #[test]
    fn test_with_bit() {
        assert_eq!(with_bit(0x0000, 0, true), 0x0001);
        assert_eq!(with_bit(0x8001, 15, false), 0x0001);
        assert_eq!(with_bit(0x0001, 9, true), 0x0201);
    }
}
