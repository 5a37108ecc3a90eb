// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus ASCII framing
//!
//! Frame layout: `':' + hex(address | PDU | LRC) + CR + LF`, 9 to 513
//! characters. Output hex is upper case; input accepts either case.

use std::time::{Duration, Instant};

use log::trace;

use super::lrc::{ascii_to_binary, binary_to_ascii, lrc, lrc_verify};
use super::pdu;
use super::types::{
    Adu, ModbusError, ModbusResult, ASCII_MAX_FRAME_SIZE, ASCII_MIN_FRAME_SIZE, MAX_PDU_SIZE,
};

pub const START_CHAR: u8 = b':';
pub const END_CR: u8 = b'\r';
pub const END_LF: u8 = b'\n';

/// Address + PDU + LRC.
const MAX_BINARY_LEN: usize = 1 + MAX_PDU_SIZE + 1;

/// Build an ASCII frame for `adu` into `frame`, returning its length.
///
/// ### Errors
///
/// `BufferOverflow` when `frame` cannot hold the encoded frame.
pub fn build_frame(adu: &Adu, frame: &mut [u8]) -> ModbusResult<usize> {
    let mut binary = [0u8; MAX_BINARY_LEN];
    binary[0] = adu.unit_id;
    let pdu_len = pdu::serialize(&adu.pdu, &mut binary[1..MAX_BINARY_LEN - 1])?;
    let mut binary_len = 1 + pdu_len;
    binary[binary_len] = lrc(&binary[..binary_len]);
    binary_len += 1;

    let total = 1 + binary_len * 2 + 2;
    if frame.len() < total {
        return Err(ModbusError::BufferOverflow);
    }
    frame[0] = START_CHAR;
    let hex_len = binary_to_ascii(&binary[..binary_len], &mut frame[1..total - 2])?;
    frame[1 + hex_len] = END_CR;
    frame[2 + hex_len] = END_LF;
    Ok(total)
}

/// Parse and LRC-check a complete ASCII frame.
///
/// ### Errors
///
/// * `Frame` for a bad length, delimiter, odd hex count or non-hex character
/// * `Crc` when the LRC does not verify
pub fn parse_frame(frame: &[u8]) -> ModbusResult<Adu> {
    if frame.len() < ASCII_MIN_FRAME_SIZE || frame.len() > ASCII_MAX_FRAME_SIZE {
        return Err(ModbusError::Frame);
    }
    if frame[0] != START_CHAR || !frame.ends_with(&[END_CR, END_LF]) {
        return Err(ModbusError::Frame);
    }
    let hex = &frame[1..frame.len() - 2];
    let mut binary = [0u8; MAX_BINARY_LEN];
    let binary_len = ascii_to_binary(hex, &mut binary).map_err(|_| ModbusError::Frame)?;
    let binary = &binary[..binary_len];
    if !lrc_verify(binary) {
        return Err(ModbusError::Crc);
    }
    let pdu = pdu::deserialize(&binary[1..binary_len - 1])?;
    Ok(Adu::new(binary[0], pdu))
}

/// States of the ASCII receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiRxState {
    Idle,
    Receiving,
    CrReceived,
    Complete,
    Error,
}

/// Character-driven receive state machine for ASCII frames.
pub struct AsciiReceiver {
    buffer: [u8; ASCII_MAX_FRAME_SIZE],
    len: usize,
    state: AsciiRxState,
    started_at: Option<Instant>,
    timeout: Duration,
    error: Option<ModbusError>,
}

impl AsciiReceiver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            buffer: [0; ASCII_MAX_FRAME_SIZE],
            len: 0,
            state: AsciiRxState::Idle,
            started_at: None,
            timeout,
            error: None,
        }
    }

    pub fn state(&self) -> AsciiRxState {
        self.state
    }

    pub fn error(&self) -> Option<ModbusError> {
        self.error
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.state = AsciiRxState::Idle;
        self.started_at = None;
        self.error = None;
    }

    fn restart(&mut self, now: Instant) {
        self.buffer[0] = START_CHAR;
        self.len = 1;
        self.started_at = Some(now);
        self.state = AsciiRxState::Receiving;
    }

    fn fail(&mut self, error: ModbusError) -> ModbusResult<AsciiRxState> {
        self.state = AsciiRxState::Error;
        self.error = Some(error);
        Err(error)
    }

    fn store(&mut self, c: u8) -> ModbusResult<()> {
        if self.len >= ASCII_MAX_FRAME_SIZE {
            self.fail(ModbusError::BufferOverflow)?;
        }
        self.buffer[self.len] = c;
        self.len += 1;
        Ok(())
    }

    /// Feed one character received at `now`.
    ///
    /// ### Errors
    ///
    /// * `BufferOverflow` when the frame grows past 513 characters
    /// * `Frame` when anything but LF (or a fresh ':') follows CR
    ///
    /// Both leave the receiver in `Error` until [`reset`](Self::reset).
    pub fn feed(&mut self, c: u8, now: Instant) -> ModbusResult<AsciiRxState> {
        match self.state {
            AsciiRxState::Idle => {
                if c == START_CHAR {
                    self.restart(now);
                }
            }
            AsciiRxState::Receiving => {
                if c == START_CHAR {
                    trace!("ASCII start character mid-frame, restarting");
                    self.restart(now);
                } else {
                    self.store(c)?;
                    if c == END_CR {
                        self.state = AsciiRxState::CrReceived;
                    }
                }
            }
            AsciiRxState::CrReceived => {
                if c == END_LF {
                    self.store(c)?;
                    self.state = AsciiRxState::Complete;
                } else if c == START_CHAR {
                    self.restart(now);
                } else {
                    return self.fail(ModbusError::Frame);
                }
            }
            AsciiRxState::Complete | AsciiRxState::Error => {}
        }
        Ok(self.state)
    }

    /// Abort a frame that has been in progress for longer than the timeout.
    ///
    /// Returns true if the receiver timed out on this call.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        let in_frame = matches!(
            self.state,
            AsciiRxState::Receiving | AsciiRxState::CrReceived
        );
        let expired = self
            .started_at
            .is_some_and(|at| now.saturating_duration_since(at) >= self.timeout);
        if in_frame && expired {
            self.state = AsciiRxState::Error;
            self.error = Some(ModbusError::Timeout);
            return true;
        }
        false
    }

    pub fn is_complete(&self) -> bool {
        self.state == AsciiRxState::Complete
    }

    /// The received frame, delimiters included, once `Complete`.
    pub fn frame(&self) -> Option<&[u8]> {
        self.is_complete().then(|| &self.buffer[..self.len])
    }
}
