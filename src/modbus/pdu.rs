// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Transport-independent PDU codec
//!
//! Typed encode/decode for FC01–FC06, FC15 and FC16, exception encoding, and
//! raw (de)serialization. All multi-byte fields are big-endian. Quantity
//! limits are enforced in both directions:
//!
//! | Operation | Quantity |
//! |-----------|----------|
//! | Read coils / discrete inputs | 1..=2000 |
//! | Read holding / input registers | 1..=125 |
//! | Write multiple coils | 1..=1968 |
//! | Write multiple registers | 1..=123 |
//!
//! Decoding a short or inconsistent PDU yields [`ModbusError::Frame`]; the
//! dispatcher turns that into an `IllegalDataValue` exception.

use super::bits::packed_len;
use super::types::{
    ExceptionCode, FunctionCode, ModbusError, ModbusResult, Pdu, COIL_OFF, COIL_ON,
    EXCEPTION_FLAG, MAX_PDU_DATA, MAX_PDU_SIZE, MAX_READ_BITS, MAX_READ_REGISTERS,
    MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

/// Start address and quantity of a read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub start: u16,
    pub quantity: u16,
}

/// Write Single Coil request (and its echo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleCoil {
    pub address: u16,
    pub value: bool,
}

/// Write Single Register request (and its echo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegister {
    pub address: u16,
    pub value: u16,
}

/// Write Multiple Coils request, borrowing the packed coil bytes from the PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleCoils<'a> {
    pub start: u16,
    pub quantity: u16,
    pub packed: &'a [u8],
}

/// Write Multiple Registers request, borrowing the register bytes from the PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegisters<'a> {
    pub start: u16,
    pub quantity: u16,
    data: &'a [u8],
}

impl<'a> WriteMultipleRegisters<'a> {
    /// Register values in request order.
    pub fn values(&self) -> impl Iterator<Item = u16> + 'a {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }
}

/// Start address and quantity echoed by a multiple-write response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleResponse {
    pub start: u16,
    pub quantity: u16,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn check_quantity(quantity: u16, max: u16) -> ModbusResult<()> {
    if quantity == 0 || quantity > max {
        Err(ModbusError::InvalidParam)
    } else {
        Ok(())
    }
}

/// Quantity ceiling applied to requests of function code `fc`.
pub fn quantity_limit(fc: FunctionCode) -> u16 {
    match fc {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => MAX_READ_BITS,
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            MAX_READ_REGISTERS
        }
        FunctionCode::WriteMultipleCoils => MAX_WRITE_COILS,
        FunctionCode::WriteMultipleRegisters => MAX_WRITE_REGISTERS,
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => 1,
    }
}

fn encode_read(fc: FunctionCode, start: u16, quantity: u16) -> ModbusResult<Pdu> {
    check_quantity(quantity, quantity_limit(fc))?;
    let mut pdu = Pdu::new(fc.as_byte());
    pdu.push_u16(start)?;
    pdu.push_u16(quantity)?;
    Ok(pdu)
}

/// FC01 request.
pub fn encode_read_coils(start: u16, quantity: u16) -> ModbusResult<Pdu> {
    encode_read(FunctionCode::ReadCoils, start, quantity)
}

/// FC02 request.
pub fn encode_read_discrete_inputs(start: u16, quantity: u16) -> ModbusResult<Pdu> {
    encode_read(FunctionCode::ReadDiscreteInputs, start, quantity)
}

/// FC03 request.
pub fn encode_read_holding_registers(start: u16, quantity: u16) -> ModbusResult<Pdu> {
    encode_read(FunctionCode::ReadHoldingRegisters, start, quantity)
}

/// FC04 request.
pub fn encode_read_input_registers(start: u16, quantity: u16) -> ModbusResult<Pdu> {
    encode_read(FunctionCode::ReadInputRegisters, start, quantity)
}

/// FC05 request; the value travels as 0xFF00 (ON) or 0x0000 (OFF).
pub fn encode_write_single_coil(address: u16, value: bool) -> ModbusResult<Pdu> {
    let mut pdu = Pdu::new(FunctionCode::WriteSingleCoil.as_byte());
    pdu.push_u16(address)?;
    pdu.push_u16(if value { COIL_ON } else { COIL_OFF })?;
    Ok(pdu)
}

/// FC06 request.
pub fn encode_write_single_register(address: u16, value: u16) -> ModbusResult<Pdu> {
    let mut pdu = Pdu::new(FunctionCode::WriteSingleRegister.as_byte());
    pdu.push_u16(address)?;
    pdu.push_u16(value)?;
    Ok(pdu)
}

/// FC15 request from already packed coil bytes.
///
/// ### Errors
///
/// `InvalidParam` for a quantity outside 1..=1968 or when `packed` holds
/// fewer than `ceil(quantity / 8)` bytes.
pub fn encode_write_multiple_coils(start: u16, quantity: u16, packed: &[u8]) -> ModbusResult<Pdu> {
    check_quantity(quantity, MAX_WRITE_COILS)?;
    let byte_count = packed_len(usize::from(quantity));
    let bytes = packed.get(..byte_count).ok_or(ModbusError::InvalidParam)?;
    let mut pdu = Pdu::new(FunctionCode::WriteMultipleCoils.as_byte());
    pdu.push_u16(start)?;
    pdu.push_u16(quantity)?;
    pdu.push_u8(byte_count as u8)?;
    pdu.extend(bytes)?;
    Ok(pdu)
}

/// FC16 request.
pub fn encode_write_multiple_registers(start: u16, values: &[u16]) -> ModbusResult<Pdu> {
    let quantity = u16::try_from(values.len()).map_err(|_| ModbusError::InvalidParam)?;
    check_quantity(quantity, MAX_WRITE_REGISTERS)?;
    let mut pdu = Pdu::new(FunctionCode::WriteMultipleRegisters.as_byte());
    pdu.push_u16(start)?;
    pdu.push_u16(quantity)?;
    pdu.push_u8((quantity * 2) as u8)?;
    for &value in values {
        pdu.push_u16(value)?;
    }
    Ok(pdu)
}

/// Decode an FC01/FC02 request.
pub fn decode_read_bits_request(pdu: &Pdu) -> ModbusResult<ReadRequest> {
    decode_read_request(pdu, MAX_READ_BITS)
}

/// Decode an FC03/FC04 request.
pub fn decode_read_registers_request(pdu: &Pdu) -> ModbusResult<ReadRequest> {
    decode_read_request(pdu, MAX_READ_REGISTERS)
}

fn decode_read_request(pdu: &Pdu, max: u16) -> ModbusResult<ReadRequest> {
    let data = pdu.data();
    if data.len() < 4 {
        return Err(ModbusError::Frame);
    }
    let request = ReadRequest {
        start: read_u16(data, 0),
        quantity: read_u16(data, 2),
    };
    check_quantity(request.quantity, max)?;
    Ok(request)
}

/// Decode an FC05 request. Any value other than 0xFF00/0x0000 is a frame error.
pub fn decode_write_single_coil(pdu: &Pdu) -> ModbusResult<WriteSingleCoil> {
    let data = pdu.data();
    if data.len() < 4 {
        return Err(ModbusError::Frame);
    }
    let value = match read_u16(data, 2) {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(ModbusError::Frame),
    };
    Ok(WriteSingleCoil {
        address: read_u16(data, 0),
        value,
    })
}

/// Decode an FC06 request.
pub fn decode_write_single_register(pdu: &Pdu) -> ModbusResult<WriteSingleRegister> {
    let data = pdu.data();
    if data.len() < 4 {
        return Err(ModbusError::Frame);
    }
    Ok(WriteSingleRegister {
        address: read_u16(data, 0),
        value: read_u16(data, 2),
    })
}

/// Decode an FC15 request; the byte count must equal `ceil(quantity / 8)`.
pub fn decode_write_multiple_coils(pdu: &Pdu) -> ModbusResult<WriteMultipleCoils<'_>> {
    let data = pdu.data();
    if data.len() < 5 {
        return Err(ModbusError::Frame);
    }
    let start = read_u16(data, 0);
    let quantity = read_u16(data, 2);
    check_quantity(quantity, MAX_WRITE_COILS)?;
    let byte_count = usize::from(data[4]);
    if byte_count != packed_len(usize::from(quantity)) || data.len() < 5 + byte_count {
        return Err(ModbusError::Frame);
    }
    Ok(WriteMultipleCoils {
        start,
        quantity,
        packed: &data[5..5 + byte_count],
    })
}

/// Decode an FC16 request; the byte count must equal `2 * quantity`.
pub fn decode_write_multiple_registers(pdu: &Pdu) -> ModbusResult<WriteMultipleRegisters<'_>> {
    let data = pdu.data();
    if data.len() < 5 {
        return Err(ModbusError::Frame);
    }
    let start = read_u16(data, 0);
    let quantity = read_u16(data, 2);
    check_quantity(quantity, MAX_WRITE_REGISTERS)?;
    let byte_count = usize::from(data[4]);
    if byte_count != usize::from(quantity) * 2 || data.len() < 5 + byte_count {
        return Err(ModbusError::Frame);
    }
    Ok(WriteMultipleRegisters {
        start,
        quantity,
        data: &data[5..5 + byte_count],
    })
}

/// FC01/FC02 response: byte count followed by the packed bits.
pub fn encode_read_bits_response(fc: FunctionCode, packed: &[u8], quantity: u16) -> ModbusResult<Pdu> {
    let byte_count = packed_len(usize::from(quantity));
    if 1 + byte_count > MAX_PDU_DATA {
        return Err(ModbusError::BufferOverflow);
    }
    let bytes = packed.get(..byte_count).ok_or(ModbusError::InvalidParam)?;
    let mut pdu = Pdu::new(fc.as_byte());
    pdu.push_u8(byte_count as u8)?;
    pdu.extend(bytes)?;
    Ok(pdu)
}

/// FC03/FC04 response: byte count followed by big-endian registers.
pub fn encode_read_registers_response(fc: FunctionCode, values: &[u16]) -> ModbusResult<Pdu> {
    let byte_count = values.len() * 2;
    if 1 + byte_count > MAX_PDU_DATA {
        return Err(ModbusError::BufferOverflow);
    }
    let mut pdu = Pdu::new(fc.as_byte());
    pdu.push_u8(byte_count as u8)?;
    for &value in values {
        pdu.push_u16(value)?;
    }
    Ok(pdu)
}

/// FC05/FC06 response: echo of address and wire value.
pub fn encode_write_single_response(fc: FunctionCode, address: u16, value: u16) -> ModbusResult<Pdu> {
    let mut pdu = Pdu::new(fc.as_byte());
    pdu.push_u16(address)?;
    pdu.push_u16(value)?;
    Ok(pdu)
}

/// FC15/FC16 response: echo of start address and quantity.
pub fn encode_write_multiple_response(fc: FunctionCode, start: u16, quantity: u16) -> ModbusResult<Pdu> {
    let mut pdu = Pdu::new(fc.as_byte());
    pdu.push_u16(start)?;
    pdu.push_u16(quantity)?;
    Ok(pdu)
}

/// Exception response: original function code with the high bit set and one
/// data byte carrying the exception code.
pub fn encode_exception(function_code: u8, code: ExceptionCode) -> Pdu {
    let mut pdu = Pdu::new(function_code | EXCEPTION_FLAG);
    // A single byte always fits
    let _ = pdu.push_u8(code.as_byte());
    pdu
}

fn check_not_exception(pdu: &Pdu) -> ModbusResult<()> {
    if pdu.is_exception() {
        let code = pdu.exception_code().ok_or(ModbusError::Frame)?;
        return Err(ModbusError::Exception(code));
    }
    Ok(())
}

/// Decode an FC01/FC02 response, returning the packed bit bytes.
pub fn decode_read_bits_response(pdu: &Pdu) -> ModbusResult<&[u8]> {
    check_not_exception(pdu)?;
    let data = pdu.data();
    let byte_count = usize::from(*data.first().ok_or(ModbusError::Frame)?);
    data.get(1..1 + byte_count).ok_or(ModbusError::Frame)
}

/// Decode an FC03/FC04 response into `values`, returning the register count.
pub fn decode_read_registers_response(pdu: &Pdu, values: &mut [u16]) -> ModbusResult<usize> {
    check_not_exception(pdu)?;
    let data = pdu.data();
    let byte_count = usize::from(*data.first().ok_or(ModbusError::Frame)?);
    if byte_count % 2 != 0 {
        return Err(ModbusError::Frame);
    }
    let bytes = data.get(1..1 + byte_count).ok_or(ModbusError::Frame)?;
    let count = byte_count / 2;
    if values.len() < count {
        return Err(ModbusError::BufferOverflow);
    }
    for (slot, pair) in values.iter_mut().zip(bytes.chunks_exact(2)) {
        *slot = u16::from_be_bytes([pair[0], pair[1]]);
    }
    Ok(count)
}

/// Decode an FC05/FC06 echo as (address, wire value).
pub fn decode_write_single_response(pdu: &Pdu) -> ModbusResult<(u16, u16)> {
    check_not_exception(pdu)?;
    let data = pdu.data();
    if data.len() < 4 {
        return Err(ModbusError::Frame);
    }
    Ok((read_u16(data, 0), read_u16(data, 2)))
}

/// Decode an FC15/FC16 response.
pub fn decode_write_multiple_response(pdu: &Pdu) -> ModbusResult<WriteMultipleResponse> {
    check_not_exception(pdu)?;
    let data = pdu.data();
    if data.len() < 4 {
        return Err(ModbusError::Frame);
    }
    Ok(WriteMultipleResponse {
        start: read_u16(data, 0),
        quantity: read_u16(data, 2),
    })
}

/// Decode an exception response into its original function code and exception.
pub fn decode_exception(pdu: &Pdu) -> ModbusResult<(u8, ExceptionCode)> {
    if !pdu.is_exception() {
        return Err(ModbusError::InvalidParam);
    }
    let code = pdu.exception_code().ok_or(ModbusError::Frame)?;
    Ok((pdu.function_code & !EXCEPTION_FLAG, code))
}

/// Write `pdu` as function code + data into `buffer`, returning the length.
///
/// ### Errors
///
/// `BufferOverflow` when `buffer` is shorter than the PDU.
pub fn serialize(pdu: &Pdu, buffer: &mut [u8]) -> ModbusResult<usize> {
    let len = pdu.len();
    if buffer.len() < len {
        return Err(ModbusError::BufferOverflow);
    }
    buffer[0] = pdu.function_code;
    buffer[1..len].copy_from_slice(pdu.data());
    Ok(len)
}

/// Parse raw bytes (function code + data) into a PDU.
///
/// ### Errors
///
/// * `Frame` for an empty slice
/// * `BufferOverflow` for more than 253 bytes
pub fn deserialize(bytes: &[u8]) -> ModbusResult<Pdu> {
    match bytes.split_first() {
        None => Err(ModbusError::Frame),
        Some(_) if bytes.len() > MAX_PDU_SIZE => Err(ModbusError::BufferOverflow),
        Some((&fc, data)) => Pdu::with_data(fc, data),
    }
}
