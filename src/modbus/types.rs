// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Core Modbus data types
//!
//! Protocol limits, function and exception codes, the error taxonomy and the
//! fixed-size PDU/ADU containers shared by the codec, the framers and the
//! dispatcher. Nothing in here allocates: every buffer is an inline array
//! sized for the largest frame the protocol allows.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest PDU (function code + data) allowed by the protocol.
pub const MAX_PDU_SIZE: usize = 253;
/// Largest PDU data payload (PDU without the function code).
pub const MAX_PDU_DATA: usize = MAX_PDU_SIZE - 1;

/// RTU frame bounds: address + function code + CRC at minimum.
pub const RTU_MIN_FRAME_SIZE: usize = 4;
pub const RTU_MAX_FRAME_SIZE: usize = 256;

/// ASCII frame bounds on the wire (':' + hex + CR LF).
pub const ASCII_MIN_FRAME_SIZE: usize = 9;
pub const ASCII_MAX_FRAME_SIZE: usize = 513;

/// MBAP header length (transaction, protocol, length, unit id).
pub const MBAP_HEADER_SIZE: usize = 7;
pub const TCP_MIN_FRAME_SIZE: usize = MBAP_HEADER_SIZE + 1;
pub const TCP_MAX_FRAME_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;

/// Quantity limits per request.
pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Unit id 0 addresses every slave and is never answered.
pub const BROADCAST_ADDRESS: u8 = 0;
pub const MAX_UNIT_ID: u8 = 247;

/// Wire value of an ON coil in a Write Single Coil request.
pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

/// High bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Function codes understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Map a wire byte to a supported function code.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Exception codes generated on the wire.
///
/// Only the four standard codes below are ever produced by the core.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    #[error("illegal function")]
    IllegalFunction = 0x01,
    #[error("illegal data address")]
    IllegalDataAddress = 0x02,
    #[error("illegal data value")]
    IllegalDataValue = 0x03,
    #[error("slave device failure")]
    SlaveDeviceFailure = 0x04,
}

impl ExceptionCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Internal error taxonomy of the Modbus core.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("operation not allowed in the current state")]
    InvalidState,
    #[error("timeout")]
    Timeout,
    #[error("checksum mismatch")]
    Crc,
    #[error("malformed frame")]
    Frame,
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("transport failure")]
    Transport,
    #[error("context not initialized")]
    NotInitialized,
    #[error("exception response: {0}")]
    Exception(ExceptionCode),
}

/// Convenience alias used throughout the protocol modules.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Protocol Data Unit: function code plus up to 252 data bytes.
#[derive(Clone, Copy)]
pub struct Pdu {
    pub function_code: u8,
    data: [u8; MAX_PDU_DATA],
    data_len: usize,
}

impl Pdu {
    /// Create an empty PDU for the given function code.
    pub fn new(function_code: u8) -> Self {
        Self {
            function_code,
            data: [0; MAX_PDU_DATA],
            data_len: 0,
        }
    }

    /// Create a PDU from a function code and a data payload.
    ///
    /// ### Errors
    ///
    /// `BufferOverflow` when `data` exceeds 252 bytes.
    pub fn with_data(function_code: u8, data: &[u8]) -> ModbusResult<Self> {
        let mut pdu = Self::new(function_code);
        pdu.set_data(data)?;
        Ok(pdu)
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len]
    }

    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Total serialized size (function code + data).
    pub fn len(&self) -> usize {
        1 + self.data_len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn set_data(&mut self, data: &[u8]) -> ModbusResult<()> {
        if data.len() > MAX_PDU_DATA {
            return Err(ModbusError::BufferOverflow);
        }
        self.data[..data.len()].copy_from_slice(data);
        self.data_len = data.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data_len = 0;
    }

    /// Append bytes to the data payload.
    pub fn extend(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        let end = self.data_len + bytes.len();
        if end > MAX_PDU_DATA {
            return Err(ModbusError::BufferOverflow);
        }
        self.data[self.data_len..end].copy_from_slice(bytes);
        self.data_len = end;
        Ok(())
    }

    pub fn push_u8(&mut self, value: u8) -> ModbusResult<()> {
        self.extend(&[value])
    }

    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.extend(&value.to_be_bytes())
    }

    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }

    /// The exception code carried by an exception response, if any.
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        if self.is_exception() && self.data_len == 1 {
            ExceptionCode::from_byte(self.data[0])
        } else {
            None
        }
    }
}

// Bytes past `data_len` are scratch and never compared.
impl PartialEq for Pdu {
    fn eq(&self, other: &Self) -> bool {
        self.function_code == other.function_code && self.data() == other.data()
    }
}

impl Eq for Pdu {}

impl Default for Pdu {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pdu")
            .field("function_code", &format_args!("{:#04x}", self.function_code))
            .field("data", &self.data())
            .finish()
    }
}

/// Application Data Unit: a PDU with its addressing information.
///
/// `transaction_id` and `protocol_id` are only meaningful for TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Adu {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub unit_id: u8,
    pub pdu: Pdu,
}

impl Adu {
    pub fn new(unit_id: u8, pdu: Pdu) -> Self {
        Self {
            transaction_id: 0,
            protocol_id: 0,
            unit_id,
            pdu,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.unit_id == BROADCAST_ADDRESS
    }
}

/// Role of a context on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Slave,
    Master,
}

/// Transport protocol of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Rtu,
    Ascii,
    Tcp,
}

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    Receiving,
    Processing,
    Sending,
    WaitingResponse,
    Error,
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial line settings for RTU and ASCII.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

/// TCP endpoint settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSettings {
    pub port: u16,
    pub timeout_ms: u32,
}

/// Protocol-specific transport options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Serial(SerialSettings),
    Tcp(TcpSettings),
}

/// Configuration a [`ModbusContext`](super::ModbusContext) is initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    pub mode: Mode,
    pub protocol: Protocol,
    pub unit_id: u8,
    pub response_timeout_ms: u32,
    pub inter_frame_delay_us: u32,
    pub transport: Transport,
}

impl ContextConfig {
    /// Default settings for a slave speaking `protocol`.
    ///
    /// TCP listens on port 502 with a 5 s receive timeout. Serial links run
    /// at 19200 baud, no parity and two stop bits, with 7 data bits for ASCII.
    pub fn default_for(protocol: Protocol) -> Self {
        let transport = match protocol {
            Protocol::Tcp => Transport::Tcp(TcpSettings {
                port: 502,
                timeout_ms: 5000,
            }),
            Protocol::Rtu | Protocol::Ascii => Transport::Serial(SerialSettings {
                baud_rate: 19200,
                data_bits: if protocol == Protocol::Ascii { 7 } else { 8 },
                stop_bits: 2,
                parity: Parity::None,
            }),
        };
        let inter_frame_delay_us = match transport {
            Transport::Serial(serial) => super::rtu::calc_interframe_delay_us(serial.baud_rate),
            Transport::Tcp(_) => 0,
        };
        Self {
            mode: Mode::Slave,
            protocol,
            unit_id: 1,
            response_timeout_ms: 1000,
            inter_frame_delay_us,
            transport,
        }
    }
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Statistics {
    pub requests_processed: u32,
    pub responses_sent: u32,
    pub errors_count: u32,
    pub exceptions_sent: u32,
}
