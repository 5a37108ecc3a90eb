// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus/TCP (MBAP) framing
//!
//! | Offset | Size | Field          |
//! |--------|------|----------------|
//! | 0      | 2    | Transaction id |
//! | 2      | 2    | Protocol id (0)|
//! | 4      | 2    | Length         |
//! | 6      | 1    | Unit id        |
//! | 7      | n    | PDU            |
//!
//! All fields are big-endian. `Length` counts the unit id plus the PDU.

use std::time::{Duration, Instant};

use log::trace;

use super::pdu;
use super::types::{
    Adu, ModbusError, ModbusResult, MBAP_HEADER_SIZE, TCP_MAX_FRAME_SIZE, TCP_MIN_FRAME_SIZE,
};

/// The only protocol identifier Modbus defines.
pub const PROTOCOL_ID: u16 = 0;

const OFFSET_TRANSACTION_ID: usize = 0;
const OFFSET_PROTOCOL_ID: usize = 2;
const OFFSET_LENGTH: usize = 4;
const OFFSET_UNIT_ID: usize = 6;

/// Bounds of the MBAP length field (unit id + function code at minimum).
const MIN_LENGTH_FIELD: u16 = 2;
const MAX_LENGTH_FIELD: u16 = 254;

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Build an MBAP frame for `adu` into `frame`, returning its length.
///
/// ### Errors
///
/// `BufferOverflow` when `frame` cannot hold the header plus the PDU.
pub fn build_frame(adu: &Adu, frame: &mut [u8]) -> ModbusResult<usize> {
    let total = MBAP_HEADER_SIZE + adu.pdu.len();
    if frame.len() < total {
        return Err(ModbusError::BufferOverflow);
    }
    write_u16(frame, OFFSET_TRANSACTION_ID, adu.transaction_id);
    write_u16(frame, OFFSET_PROTOCOL_ID, adu.protocol_id);
    // Bounded by MAX_PDU_SIZE + 1.
    write_u16(frame, OFFSET_LENGTH, (1 + adu.pdu.len()) as u16);
    frame[OFFSET_UNIT_ID] = adu.unit_id;
    pdu::serialize(&adu.pdu, &mut frame[MBAP_HEADER_SIZE..total])?;
    Ok(total)
}

/// Parse a complete MBAP frame.
///
/// ### Errors
///
/// `Frame` when the size is out of bounds, the protocol id is not 0 or the
/// length field disagrees with the frame size.
pub fn parse_frame(frame: &[u8]) -> ModbusResult<Adu> {
    if frame.len() < TCP_MIN_FRAME_SIZE || frame.len() > TCP_MAX_FRAME_SIZE {
        return Err(ModbusError::Frame);
    }
    let protocol_id = read_u16(frame, OFFSET_PROTOCOL_ID);
    if protocol_id != PROTOCOL_ID {
        return Err(ModbusError::Frame);
    }
    let length = usize::from(read_u16(frame, OFFSET_LENGTH));
    if OFFSET_UNIT_ID + length != frame.len() {
        return Err(ModbusError::Frame);
    }
    Ok(Adu {
        transaction_id: read_u16(frame, OFFSET_TRANSACTION_ID),
        protocol_id,
        unit_id: frame[OFFSET_UNIT_ID],
        pdu: pdu::deserialize(&frame[MBAP_HEADER_SIZE..])?,
    })
}

/// Transaction id of a frame holding at least a full header.
pub fn transaction_id(frame: &[u8]) -> Option<u16> {
    (frame.len() >= MBAP_HEADER_SIZE).then(|| read_u16(frame, OFFSET_TRANSACTION_ID))
}

/// Unit id of a frame holding at least a full header.
pub fn unit_id(frame: &[u8]) -> Option<u8> {
    (frame.len() >= MBAP_HEADER_SIZE).then(|| frame[OFFSET_UNIT_ID])
}

/// Transaction id generator for outgoing requests.
///
/// Each context owns its own counter.
#[derive(Debug, Default, Clone)]
pub struct TransactionCounter {
    next: u16,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current id and advance, wrapping at 65535.
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    pub fn set(&mut self, id: u16) {
        self.next = id;
    }
}

/// States of the MBAP receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpRxState {
    /// Collecting the 7-byte header.
    Header,
    /// Collecting `length - 1` PDU bytes.
    Pdu,
    Complete,
    Error,
}

/// Stream receiver that reassembles one MBAP frame from arbitrary chunks.
pub struct TcpReceiver {
    buffer: [u8; TCP_MAX_FRAME_SIZE],
    len: usize,
    expected: usize,
    state: TcpRxState,
    started_at: Option<Instant>,
    timeout: Duration,
}

impl TcpReceiver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            buffer: [0; TCP_MAX_FRAME_SIZE],
            len: 0,
            expected: MBAP_HEADER_SIZE,
            state: TcpRxState::Header,
            started_at: None,
            timeout,
        }
    }

    pub fn state(&self) -> TcpRxState {
        self.state
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.expected = MBAP_HEADER_SIZE;
        self.state = TcpRxState::Header;
        self.started_at = None;
    }

    /// Bytes buffered for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.len
    }

    fn fail(&mut self, error: ModbusError) -> ModbusResult<usize> {
        self.state = TcpRxState::Error;
        Err(error)
    }

    /// Consume bytes from `data` received at `now`.
    ///
    /// Stops at the end of a frame; the return value is the number of bytes
    /// consumed, so any surplus belongs to the next frame.
    ///
    /// ### Errors
    ///
    /// * `InvalidState` when called while `Complete` or `Error`
    /// * `Frame` when the header carries a non-zero protocol id or a length
    ///   outside 2..=254
    /// * `BufferOverflow` when the frame would exceed 260 bytes
    pub fn feed(&mut self, data: &[u8], now: Instant) -> ModbusResult<usize> {
        if matches!(self.state, TcpRxState::Complete | TcpRxState::Error) {
            return Err(ModbusError::InvalidState);
        }
        if self.len == 0 {
            self.started_at = Some(now);
        }

        let mut consumed = 0;
        while consumed < data.len() && self.state != TcpRxState::Complete {
            let take = (self.expected - self.len).min(data.len() - consumed);
            if self.len + take > TCP_MAX_FRAME_SIZE {
                return self.fail(ModbusError::BufferOverflow);
            }
            self.buffer[self.len..self.len + take]
                .copy_from_slice(&data[consumed..consumed + take]);
            self.len += take;
            consumed += take;

            if self.len < self.expected {
                continue;
            }
            match self.state {
                TcpRxState::Header => {
                    let protocol_id = read_u16(&self.buffer, OFFSET_PROTOCOL_ID);
                    let length = read_u16(&self.buffer, OFFSET_LENGTH);
                    if protocol_id != PROTOCOL_ID
                        || !(MIN_LENGTH_FIELD..=MAX_LENGTH_FIELD).contains(&length)
                    {
                        trace!(
                            "Rejecting MBAP header: protocol {}, length {}",
                            protocol_id,
                            length
                        );
                        return self.fail(ModbusError::Frame);
                    }
                    self.expected = OFFSET_UNIT_ID + usize::from(length);
                    self.state = TcpRxState::Pdu;
                }
                TcpRxState::Pdu => self.state = TcpRxState::Complete,
                TcpRxState::Complete | TcpRxState::Error => {}
            }
        }
        Ok(consumed)
    }

    /// True when a partial frame has been pending for at least the timeout.
    pub fn is_timeout(&self, now: Instant) -> bool {
        if matches!(self.state, TcpRxState::Complete | TcpRxState::Error) || self.len == 0 {
            return false;
        }
        self.started_at
            .is_some_and(|at| now.saturating_duration_since(at) >= self.timeout)
    }

    pub fn is_complete(&self) -> bool {
        self.state == TcpRxState::Complete
    }

    /// The received frame once `Complete`.
    ///
    /// ### Errors
    ///
    /// `InvalidState` in any other state.
    pub fn frame(&self) -> ModbusResult<&[u8]> {
        if self.is_complete() {
            Ok(&self.buffer[..self.len])
        } else {
            Err(ModbusError::InvalidState)
        }
    }
}
