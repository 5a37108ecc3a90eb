// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus RTU framing
//!
//! Frame layout: `[address | PDU | CRC lo | CRC hi]`, 4 to 256 bytes.
//!
//! Frame boundaries are defined by silence on the line. A character is 11
//! bits; the inter-character timeout is 1.5 character times and the
//! inter-frame delay 3.5 character times. Above 19200 baud both are fixed at
//! 750 µs and 1750 µs.
//!
//! | State | Byte arrives | Frame-end check |
//! |-------|--------------|-----------------|
//! | `Idle` | starts a frame | - |
//! | `Receiving` | appended, or restarts the frame after an inter-character gap | `Complete` if ≥ 4 bytes, else `Error` |
//! | `Complete` / `Error` | ignored until [`RtuReceiver::reset`] | - |

use std::time::{Duration, Instant};

use log::trace;

use super::crc::{crc16_append, crc16_verify};
use super::pdu;
use super::types::{
    Adu, ModbusError, ModbusResult, BROADCAST_ADDRESS, RTU_MAX_FRAME_SIZE, RTU_MIN_FRAME_SIZE,
};

const FAST_BAUD_THRESHOLD: u32 = 19200;
const FAST_INTERFRAME_US: u32 = 1750;
const FAST_INTERCHAR_US: u32 = 750;

/// Inter-frame delay (t3.5) in microseconds for `baud_rate`, rounded.
pub fn calc_interframe_delay_us(baud_rate: u32) -> u32 {
    if baud_rate == 0 || baud_rate > FAST_BAUD_THRESHOLD {
        FAST_INTERFRAME_US
    } else {
        // 3.5 chars * 11 bits * 1e6 µs
        ((38_500_000u64 + u64::from(baud_rate / 2)) / u64::from(baud_rate)) as u32
    }
}

/// Inter-character timeout (t1.5) in microseconds for `baud_rate`, rounded.
pub fn calc_interchar_timeout_us(baud_rate: u32) -> u32 {
    if baud_rate == 0 || baud_rate > FAST_BAUD_THRESHOLD {
        FAST_INTERCHAR_US
    } else {
        ((16_500_000u64 + u64::from(baud_rate / 2)) / u64::from(baud_rate)) as u32
    }
}

/// True if a frame addressed to `frame_address` must be handled by `own_address`.
pub fn address_match(frame_address: u8, own_address: u8) -> bool {
    frame_address == BROADCAST_ADDRESS || frame_address == own_address
}

pub fn is_broadcast(address: u8) -> bool {
    address == BROADCAST_ADDRESS
}

/// Build an RTU frame for `adu` into `buffer`, returning its length.
///
/// ### Errors
///
/// `BufferOverflow` when `buffer` cannot hold address, PDU and CRC.
pub fn build_frame(adu: &Adu, buffer: &mut [u8]) -> ModbusResult<usize> {
    let body_len = 1 + adu.pdu.len();
    if body_len + 2 > buffer.len() || body_len + 2 > RTU_MAX_FRAME_SIZE {
        return Err(ModbusError::BufferOverflow);
    }
    buffer[0] = adu.unit_id;
    pdu::serialize(&adu.pdu, &mut buffer[1..body_len])?;
    crc16_append(buffer, body_len)
}

/// Parse and CRC-check a complete RTU frame.
///
/// ### Errors
///
/// * `Frame` when the length is outside 4..=256
/// * `Crc` when the checksum does not match
pub fn parse_frame(frame: &[u8]) -> ModbusResult<Adu> {
    if !(RTU_MIN_FRAME_SIZE..=RTU_MAX_FRAME_SIZE).contains(&frame.len()) {
        return Err(ModbusError::Frame);
    }
    if !crc16_verify(frame) {
        return Err(ModbusError::Crc);
    }
    let pdu = pdu::deserialize(&frame[1..frame.len() - 2])?;
    Ok(Adu::new(frame[0], pdu))
}

/// States of the RTU receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtuRxState {
    Idle,
    Receiving,
    Complete,
    Error,
}

/// Expected length of the RTU request starting with `frame`.
///
/// 8 bytes for FC01..FC06, 9 plus the byte count for FC15/FC16. `None` for
/// other function codes or while the byte count has not arrived yet.
pub fn request_frame_len(frame: &[u8]) -> Option<usize> {
    match frame.get(1)? {
        0x01..=0x06 => Some(8),
        0x0F | 0x10 => frame.get(6).map(|&count| 9 + usize::from(count)),
        _ => None,
    }
}

/// Silence-timed receive state machine for RTU frames.
pub struct RtuReceiver {
    buffer: [u8; RTU_MAX_FRAME_SIZE],
    len: usize,
    state: RtuRxState,
    last_byte_at: Option<Instant>,
    interchar_timeout: Duration,
    interframe_delay: Duration,
    error: Option<ModbusError>,
}

impl RtuReceiver {
    /// Receiver timed for a line running at `baud_rate`.
    pub fn new(baud_rate: u32) -> Self {
        Self::with_timing(
            Duration::from_micros(u64::from(calc_interchar_timeout_us(baud_rate))),
            Duration::from_micros(u64::from(calc_interframe_delay_us(baud_rate))),
        )
    }

    pub fn with_timing(interchar_timeout: Duration, interframe_delay: Duration) -> Self {
        Self {
            buffer: [0; RTU_MAX_FRAME_SIZE],
            len: 0,
            state: RtuRxState::Idle,
            last_byte_at: None,
            interchar_timeout,
            interframe_delay,
            error: None,
        }
    }

    pub fn state(&self) -> RtuRxState {
        self.state
    }

    /// Error that moved the receiver to `Error`, if any.
    pub fn error(&self) -> Option<ModbusError> {
        self.error
    }

    pub fn interframe_delay(&self) -> Duration {
        self.interframe_delay
    }

    /// Drop any partial frame and return to `Idle`.
    pub fn reset(&mut self) {
        self.len = 0;
        self.state = RtuRxState::Idle;
        self.last_byte_at = None;
        self.error = None;
    }

    fn start_frame(&mut self, byte: u8, now: Instant) {
        self.buffer[0] = byte;
        self.len = 1;
        self.last_byte_at = Some(now);
        self.state = RtuRxState::Receiving;
    }

    /// Feed one received byte observed at `now`.
    pub fn feed(&mut self, byte: u8, now: Instant) -> RtuRxState {
        match self.state {
            RtuRxState::Idle => self.start_frame(byte, now),
            RtuRxState::Receiving => {
                let gap = self
                    .last_byte_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if gap > self.interchar_timeout {
                    trace!("RTU inter-character gap of {:?}, restarting frame", gap);
                    self.start_frame(byte, now);
                } else if self.len >= RTU_MAX_FRAME_SIZE {
                    self.state = RtuRxState::Error;
                    self.error = Some(ModbusError::BufferOverflow);
                } else {
                    self.buffer[self.len] = byte;
                    self.len += 1;
                    self.last_byte_at = Some(now);
                }
            }
            RtuRxState::Complete | RtuRxState::Error => {}
        }
        self.state
    }

    /// Feed a burst of bytes that all arrived at `now`.
    pub fn feed_all(&mut self, bytes: &[u8], now: Instant) -> RtuRxState {
        for &byte in bytes {
            self.feed(byte, now);
        }
        self.state
    }

    /// Check for end of frame: the line has been silent for the inter-frame delay.
    pub fn is_complete(&mut self, now: Instant) -> bool {
        if self.state == RtuRxState::Receiving {
            if let Some(at) = self.last_byte_at {
                if now.saturating_duration_since(at) >= self.interframe_delay {
                    if self.len >= RTU_MIN_FRAME_SIZE {
                        self.state = RtuRxState::Complete;
                    } else {
                        self.state = RtuRxState::Error;
                        self.error = Some(ModbusError::Frame);
                    }
                }
            }
        }
        self.state == RtuRxState::Complete
    }

    /// The bytes received so far form a whole request with a valid CRC.
    pub fn holds_complete_request(&self) -> bool {
        let frame = &self.buffer[..self.len];
        self.state == RtuRxState::Receiving
            && request_frame_len(frame) == Some(self.len)
            && crc16_verify(frame)
    }

    /// The received frame once the receiver is `Complete`.
    pub fn frame(&self) -> Option<&[u8]> {
        (self.state == RtuRxState::Complete).then(|| &self.buffer[..self.len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::pdu::encode_read_holding_registers;

    const REQUEST: [u8; 8] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD];

    #[test]
    fn test_timing_values() {
        assert_eq!(calc_interframe_delay_us(9600), 4010);
        assert_eq!(calc_interframe_delay_us(19200), 2005);
        assert_eq!(calc_interframe_delay_us(38400), 1750);
        assert_eq!(calc_interframe_delay_us(0), 1750);
        assert_eq!(calc_interchar_timeout_us(9600), 1719);
        assert_eq!(calc_interchar_timeout_us(115200), 750);
    }

    #[test]
    fn test_request_frame_len() {
        assert_eq!(request_frame_len(&REQUEST), Some(8));
        assert_eq!(request_frame_len(&[0x01]), None);
        assert_eq!(request_frame_len(&[0x01, 0x10, 0x00, 0x01, 0x00, 0x02]), None);
        assert_eq!(
            request_frame_len(&[0x01, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04]),
            Some(13)
        );
        assert_eq!(request_frame_len(&[0x01, 0x0F, 0x00, 0x00, 0x00, 0x0A, 0x02]), Some(11));
        assert_eq!(request_frame_len(&[0x01, 0x07]), None);
    }

    #[test]
    fn test_complete_request_detected_without_silence() {
        let mut rx = RtuReceiver::with_timing(Duration::from_millis(1), Duration::from_millis(3));
        let t0 = Instant::now();
        rx.feed_all(&REQUEST[..7], t0);
        assert!(!rx.holds_complete_request());
        rx.feed(REQUEST[7], t0);
        assert!(rx.holds_complete_request());

        let mut corrupted = REQUEST;
        corrupted[7] ^= 0x01;
        rx.reset();
        rx.feed_all(&corrupted, t0);
        assert!(!rx.holds_complete_request());
    }

    #[test]
    fn test_address_matching() {
        assert!(address_match(0x01, 0x01));
        assert!(address_match(0x00, 0x01));
        assert!(!address_match(0x02, 0x01));
        assert!(is_broadcast(0));
        assert!(!is_broadcast(1));
    }

    #[test]
    fn test_build_read_holding_frame() {
        let adu = Adu::new(1, encode_read_holding_registers(0, 10).unwrap());
        let mut buffer = [0u8; RTU_MAX_FRAME_SIZE];
        let len = build_frame(&adu, &mut buffer).unwrap();
        assert_eq!(&buffer[..len], &REQUEST);

        let mut small = [0u8; 7];
        assert_eq!(build_frame(&adu, &mut small), Err(ModbusError::BufferOverflow));
    }

    #[test]
    fn test_parse_read_holding_frame() {
        let adu = parse_frame(&REQUEST).unwrap();
        assert_eq!(adu.unit_id, 1);
        assert_eq!(adu.pdu.function_code, 0x03);
        assert_eq!(adu.pdu.data(), &[0x00, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        let mut corrupted = REQUEST;
        corrupted[7] = 0x00;
        assert_eq!(parse_frame(&corrupted), Err(ModbusError::Crc));
        assert_eq!(parse_frame(&REQUEST[..3]), Err(ModbusError::Frame));
    }

    #[test]
    fn test_receiver_completes_after_silence() {
        let t0 = Instant::now();
        let mut rx = RtuReceiver::new(19200);
        for (i, &b) in REQUEST.iter().enumerate() {
            rx.feed(b, t0 + Duration::from_micros(500 * i as u64));
        }
        let last = t0 + Duration::from_micros(500 * 7);
        assert!(!rx.is_complete(last + Duration::from_micros(1000)));
        assert!(rx.is_complete(last + Duration::from_micros(2005)));
        assert_eq!(rx.frame(), Some(&REQUEST[..]));

        // Bytes after completion are ignored until reset
        rx.feed(0x55, last + Duration::from_millis(5));
        assert_eq!(rx.frame(), Some(&REQUEST[..]));
        rx.reset();
        assert_eq!(rx.state(), RtuRxState::Idle);
    }

    #[test]
    fn test_receiver_restarts_after_interchar_gap() {
        let t0 = Instant::now();
        let mut rx = RtuReceiver::new(19200);
        rx.feed(0xAA, t0);
        rx.feed(0xBB, t0 + Duration::from_micros(100));
        // 859 µs is t1.5 at 19200 baud
        let restart = t0 + Duration::from_micros(1100);
        rx.feed_all(&REQUEST, restart);
        assert!(rx.is_complete(restart + Duration::from_millis(3)));
        assert_eq!(rx.frame(), Some(&REQUEST[..]));
    }

    #[test]
    fn test_receiver_short_frame_is_error() {
        let t0 = Instant::now();
        let mut rx = RtuReceiver::new(9600);
        rx.feed_all(&[0x01, 0x03, 0x00], t0);
        assert!(!rx.is_complete(t0 + Duration::from_millis(10)));
        assert_eq!(rx.state(), RtuRxState::Error);
        assert_eq!(rx.error(), Some(ModbusError::Frame));
    }

    #[test]
    fn test_receiver_overflow_is_error() {
        let t0 = Instant::now();
        let mut rx = RtuReceiver::new(19200);
        rx.feed_all(&[0u8; RTU_MAX_FRAME_SIZE], t0);
        assert_eq!(rx.state(), RtuRxState::Receiving);
        rx.feed(0, t0);
        assert_eq!(rx.state(), RtuRxState::Error);
        assert_eq!(rx.error(), Some(ModbusError::BufferOverflow));
    }
}
