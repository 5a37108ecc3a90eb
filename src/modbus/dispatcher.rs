// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Slave request dispatcher
//!
//! [`ModbusContext`] owns the configuration, statistics and scratch banks of
//! one Modbus slave instance and turns request PDUs into response PDUs by
//! calling into a [`RegisterAccess`] implementation.
//!
//! ### Exception mapping
//!
//! | Condition | Response |
//! |-----------|----------|
//! | Unsupported function code | `IllegalFunction` |
//! | Malformed request or quantity out of bounds | `IllegalDataValue` |
//! | Handler failure | the handler's exception code |
//! | Response encoding failure | `SlaveDeviceFailure` |
//!
//! Requests addressed to another unit produce no response. Broadcast requests
//! (unit 0) are executed but never answered.

use log::{debug, error, trace};

use super::bits::{pack_bits, packed_len, unpack_bits};
use super::callbacks::{ModbusHooks, NoHooks, RegisterAccess};
use super::pdu::{
    decode_read_bits_request, decode_read_registers_request, decode_write_multiple_coils,
    decode_write_multiple_registers, decode_write_single_coil, decode_write_single_register,
    encode_exception, encode_read_bits_response, encode_read_registers_response,
    encode_write_multiple_response, encode_write_single_response,
};
use super::tcp::TransactionCounter;
use super::types::{
    Adu, ContextConfig, ExceptionCode, FunctionCode, Mode, ModbusError, ModbusResult, Pdu,
    State, Statistics, BROADCAST_ADDRESS, COIL_OFF, COIL_ON, MAX_READ_BITS, MAX_READ_REGISTERS,
    MAX_UNIT_ID,
};

const COIL_SCRATCH: usize = MAX_READ_BITS as usize;
const REGISTER_SCRATCH: usize = MAX_READ_REGISTERS as usize;

fn illegal_value(_: ModbusError) -> ModbusError {
    ModbusError::Exception(ExceptionCode::IllegalDataValue)
}

fn validate_config(config: &ContextConfig) -> ModbusResult<()> {
    if config.mode == Mode::Slave
        && (config.unit_id == BROADCAST_ADDRESS || config.unit_id > MAX_UNIT_ID)
    {
        return Err(ModbusError::InvalidParam);
    }
    Ok(())
}

/// One Modbus slave instance.
pub struct ModbusContext<A: RegisterAccess, H: ModbusHooks = NoHooks> {
    config: ContextConfig,
    initialized: bool,
    state: State,
    statistics: Statistics,
    last_exception: Option<ExceptionCode>,
    transactions: TransactionCounter,
    access: A,
    hooks: H,
    coil_buffer: [bool; COIL_SCRATCH],
    register_buffer: [u16; REGISTER_SCRATCH],
}

impl<A: RegisterAccess> ModbusContext<A, NoHooks> {
    /// Initialize a context without event hooks.
    ///
    /// ### Errors
    ///
    /// `InvalidParam` when a slave is configured with unit id 0 or above 247.
    pub fn new(config: ContextConfig, access: A) -> ModbusResult<Self> {
        Self::with_hooks(config, access, NoHooks)
    }
}

impl<A: RegisterAccess, H: ModbusHooks> ModbusContext<A, H> {
    /// Initialize a context that reports events to `hooks`.
    ///
    /// ### Errors
    ///
    /// `InvalidParam` when a slave is configured with unit id 0 or above 247.
    pub fn with_hooks(config: ContextConfig, access: A, hooks: H) -> ModbusResult<Self> {
        validate_config(&config)?;
        Ok(Self {
            config,
            initialized: true,
            state: State::Idle,
            statistics: Statistics::default(),
            last_exception: None,
            transactions: TransactionCounter::new(),
            access,
            hooks,
            coil_buffer: [false; COIL_SCRATCH],
            register_buffer: [0; REGISTER_SCRATCH],
        })
    }

    /// Re-initialize with a new configuration, clearing statistics.
    pub fn init(&mut self, config: ContextConfig) -> ModbusResult<()> {
        validate_config(&config)?;
        self.config = config;
        self.initialized = true;
        self.state = State::Idle;
        self.statistics = Statistics::default();
        self.last_exception = None;
        self.transactions.reset();
        Ok(())
    }

    /// Take the context out of service.
    ///
    /// ### Errors
    ///
    /// `NotInitialized` if the context was already deinitialized.
    pub fn deinit(&mut self) -> ModbusResult<()> {
        if !self.initialized {
            return Err(ModbusError::NotInitialized);
        }
        self.initialized = false;
        self.state = State::Idle;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current state; `Error` for a deinitialized context.
    pub fn state(&self) -> State {
        if self.initialized {
            self.state
        } else {
            State::Error
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn unit_id(&self) -> u8 {
        self.config.unit_id
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics = Statistics::default();
    }

    /// Most recent exception code put on the wire.
    pub fn last_exception(&self) -> Option<ExceptionCode> {
        self.last_exception
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Transaction id for the next outgoing request of a master context.
    pub fn next_transaction_id(&mut self) -> u16 {
        self.transactions.next_id()
    }

    /// Count a failure detected outside the dispatcher (framing, CRC, LRC).
    pub fn record_error(&mut self, err: ModbusError) {
        self.statistics.errors_count = self.statistics.errors_count.wrapping_add(1);
        self.hooks.on_error(err);
    }

    /// Process one request PDU into a response PDU.
    ///
    /// Every request yields a response PDU, possibly an exception response.
    ///
    /// ### Errors
    ///
    /// * `NotInitialized` for a deinitialized context
    /// * `InvalidState` for a context configured as master
    pub fn process_pdu(&mut self, request: &Pdu) -> ModbusResult<Pdu> {
        if !self.initialized {
            return Err(ModbusError::NotInitialized);
        }
        if self.config.mode != Mode::Slave {
            return Err(ModbusError::InvalidState);
        }
        let function_code = request.function_code;
        self.statistics.requests_processed = self.statistics.requests_processed.wrapping_add(1);
        self.state = State::Processing;
        self.hooks.on_request(function_code);

        let outcome = match FunctionCode::from_byte(function_code) {
            Some(fc) => self.dispatch(fc, request),
            None => {
                debug!("Unsupported function code {:#04x}", function_code);
                Err(ModbusError::Exception(ExceptionCode::IllegalFunction))
            }
        };

        let response = match outcome {
            Ok(pdu) => {
                self.hooks.on_response(function_code, None);
                pdu
            }
            Err(ModbusError::Exception(code)) => self.exception_response(function_code, code),
            Err(err) => {
                error!(
                    "Failed to build response for function code {:#04x}: {}",
                    function_code, err
                );
                self.state = State::Error;
                self.record_error(err);
                self.exception_response(function_code, ExceptionCode::SlaveDeviceFailure)
            }
        };
        self.state = State::Idle;
        Ok(response)
    }

    /// Process a request ADU.
    ///
    /// Returns `None` when no response must be sent: the request was addressed
    /// to another unit, or it was a broadcast. The response carries this
    /// context's unit id and echoes the transaction and protocol ids.
    ///
    /// ### Errors
    ///
    /// Same as [`process_pdu`](Self::process_pdu).
    pub fn process_adu(&mut self, request: &Adu) -> ModbusResult<Option<Adu>> {
        if !self.initialized {
            return Err(ModbusError::NotInitialized);
        }
        if request.unit_id != self.config.unit_id && !request.is_broadcast() {
            trace!(
                "Ignoring request for unit {} (this unit is {})",
                request.unit_id,
                self.config.unit_id
            );
            return Ok(None);
        }
        let pdu = self.process_pdu(&request.pdu)?;
        if request.is_broadcast() {
            return Ok(None);
        }
        self.statistics.responses_sent = self.statistics.responses_sent.wrapping_add(1);
        Ok(Some(Adu {
            transaction_id: request.transaction_id,
            protocol_id: request.protocol_id,
            unit_id: self.config.unit_id,
            pdu,
        }))
    }

    fn exception_response(&mut self, function_code: u8, code: ExceptionCode) -> Pdu {
        debug!(
            "Exception {:#04x} ({}) for function code {:#04x}",
            code.as_byte(),
            code,
            function_code
        );
        self.statistics.exceptions_sent = self.statistics.exceptions_sent.wrapping_add(1);
        self.last_exception = Some(code);
        self.hooks.on_response(function_code, Some(code));
        encode_exception(function_code, code)
    }

    fn dispatch(&mut self, fc: FunctionCode, request: &Pdu) -> ModbusResult<Pdu> {
        match fc {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                let read = decode_read_bits_request(request).map_err(illegal_value)?;
                debug!("FC{:02} start {} quantity {}", fc.as_byte(), read.start, read.quantity);
                let bits = &mut self.coil_buffer[..usize::from(read.quantity)];
                bits.fill(false);
                if fc == FunctionCode::ReadCoils {
                    self.access.read_coils(read.start, bits)
                } else {
                    self.access.read_discrete_inputs(read.start, bits)
                }
                .map_err(ModbusError::Exception)?;
                let mut packed = [0u8; packed_len(COIL_SCRATCH)];
                pack_bits(bits, &mut packed).ok_or(ModbusError::BufferOverflow)?;
                encode_read_bits_response(fc, &packed, read.quantity)
            }
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                let read = decode_read_registers_request(request).map_err(illegal_value)?;
                debug!("FC{:02} start {} quantity {}", fc.as_byte(), read.start, read.quantity);
                let registers = &mut self.register_buffer[..usize::from(read.quantity)];
                registers.fill(0);
                if fc == FunctionCode::ReadHoldingRegisters {
                    self.access.read_holding_registers(read.start, registers)
                } else {
                    self.access.read_input_registers(read.start, registers)
                }
                .map_err(ModbusError::Exception)?;
                encode_read_registers_response(fc, registers)
            }
            FunctionCode::WriteSingleCoil => {
                let write = decode_write_single_coil(request).map_err(illegal_value)?;
                debug!("FC05 address {} value {}", write.address, write.value);
                self.access
                    .write_single_coil(write.address, write.value)
                    .map_err(ModbusError::Exception)?;
                let echo = if write.value { COIL_ON } else { COIL_OFF };
                encode_write_single_response(fc, write.address, echo)
            }
            FunctionCode::WriteSingleRegister => {
                let write = decode_write_single_register(request).map_err(illegal_value)?;
                debug!("FC06 address {} value {}", write.address, write.value);
                self.access
                    .write_single_register(write.address, write.value)
                    .map_err(ModbusError::Exception)?;
                encode_write_single_response(fc, write.address, write.value)
            }
            FunctionCode::WriteMultipleCoils => {
                let write = decode_write_multiple_coils(request).map_err(illegal_value)?;
                debug!("FC15 start {} quantity {}", write.start, write.quantity);
                let bits = &mut self.coil_buffer[..usize::from(write.quantity)];
                unpack_bits(write.packed, bits).ok_or(ModbusError::Frame).map_err(illegal_value)?;
                self.access
                    .write_multiple_coils(write.start, bits)
                    .map_err(ModbusError::Exception)?;
                encode_write_multiple_response(fc, write.start, write.quantity)
            }
            FunctionCode::WriteMultipleRegisters => {
                let write = decode_write_multiple_registers(request).map_err(illegal_value)?;
                debug!("FC16 start {} quantity {}", write.start, write.quantity);
                let registers = &mut self.register_buffer[..usize::from(write.quantity)];
                for (slot, value) in registers.iter_mut().zip(write.values()) {
                    *slot = value;
                }
                self.access
                    .write_multiple_registers(write.start, registers)
                    .map_err(ModbusError::Exception)?;
                encode_write_multiple_response(fc, write.start, write.quantity)
            }
        }
    }
}
