// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Application interface of the dispatcher
//!
//! [`RegisterAccess`] is the set of per-function-code handlers the
//! dispatcher calls into. Read handlers fill a dispatcher-owned scratch slice
//! whose length is the requested quantity and which has been cleared before
//! the call. Every handler reports failure as the exception code that goes on
//! the wire:
//!
//! | Failure | Exception |
//! |---------|-----------|
//! | Address outside the bank, or a read-only target | `IllegalDataAddress` |
//! | Value outside its allowed range | `IllegalDataValue` |
//! | Hardware failure (I²C NAK, GPIO read error) | `SlaveDeviceFailure` |
//!
//! [`ModbusHooks`] carries optional event notifications with no-op defaults.

use super::types::{ExceptionCode, ModbusError};

/// Result type of every register handler.
pub type AccessResult = Result<(), ExceptionCode>;

/// Address of element `offset` of a request starting at `start`.
///
/// ### Errors
///
/// `IllegalDataAddress` when the request runs past address 0xFFFF.
pub fn element_address(start: u16, offset: usize) -> Result<u16, ExceptionCode> {
    u16::try_from(offset)
        .ok()
        .and_then(|offset| start.checked_add(offset))
        .ok_or(ExceptionCode::IllegalDataAddress)
}

/// Per-function-code register handlers.
///
/// The multiple-write handlers default to applying the single-write handler
/// element by element and stopping at the first failure.
pub trait RegisterAccess: Send {
    /// FC01: fill `values` with the coils starting at `start`.
    fn read_coils(&mut self, start: u16, values: &mut [bool]) -> AccessResult;

    /// FC02: fill `values` with the discrete inputs starting at `start`.
    fn read_discrete_inputs(&mut self, start: u16, values: &mut [bool]) -> AccessResult;

    /// FC03: fill `values` with the holding registers starting at `start`.
    fn read_holding_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult;

    /// FC04: fill `values` with the input registers starting at `start`.
    fn read_input_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult;

    /// FC05.
    fn write_single_coil(&mut self, address: u16, value: bool) -> AccessResult;

    /// FC06.
    fn write_single_register(&mut self, address: u16, value: u16) -> AccessResult;

    /// FC15.
    fn write_multiple_coils(&mut self, start: u16, values: &[bool]) -> AccessResult {
        for (offset, &value) in values.iter().enumerate() {
            self.write_single_coil(element_address(start, offset)?, value)?;
        }
        Ok(())
    }

    /// FC16.
    fn write_multiple_registers(&mut self, start: u16, values: &[u16]) -> AccessResult {
        for (offset, &value) in values.iter().enumerate() {
            self.write_single_register(element_address(start, offset)?, value)?;
        }
        Ok(())
    }
}

/// Optional dispatcher event notifications.
pub trait ModbusHooks: Send {
    /// A request with function code `function_code` is about to be dispatched.
    fn on_request(&mut self, _function_code: u8) {}

    /// A response has been built; `exception` is set for exception responses.
    fn on_response(&mut self, _function_code: u8, _exception: Option<ExceptionCode>) {}

    /// Dispatch or reception failed.
    fn on_error(&mut self, _error: ModbusError) {}
}

/// Hooks that ignore every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ModbusHooks for NoHooks {}

/// Flat in-memory register banks with fixed sizes.
///
/// Every address below the bank size is readable and writable; discrete
/// inputs and input registers are set through [`set_discrete_input`] and
/// [`set_input_register`]. Used for protocol tests and for serial sessions
/// that have no device behind them.
///
/// [`set_discrete_input`]: MemoryBanks::set_discrete_input
/// [`set_input_register`]: MemoryBanks::set_input_register
#[derive(Debug, Clone)]
pub struct MemoryBanks {
    pub coils: Vec<bool>,
    pub discrete_inputs: Vec<bool>,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
}

impl MemoryBanks {
    pub fn new(bits: usize, registers: usize) -> Self {
        Self {
            coils: vec![false; bits],
            discrete_inputs: vec![false; bits],
            holding_registers: vec![0; registers],
            input_registers: vec![0; registers],
        }
    }

    pub fn set_discrete_input(&mut self, address: u16, value: bool) {
        if let Some(slot) = self.discrete_inputs.get_mut(usize::from(address)) {
            *slot = value;
        }
    }

    pub fn set_input_register(&mut self, address: u16, value: u16) {
        if let Some(slot) = self.input_registers.get_mut(usize::from(address)) {
            *slot = value;
        }
    }
}

fn copy_range<T: Copy>(bank: &[T], start: u16, out: &mut [T]) -> AccessResult {
    let start = usize::from(start);
    let source = bank
        .get(start..start + out.len())
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    out.copy_from_slice(source);
    Ok(())
}

fn store<T>(bank: &mut [T], address: u16, value: T) -> AccessResult {
    let slot = bank
        .get_mut(usize::from(address))
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    *slot = value;
    Ok(())
}

impl RegisterAccess for MemoryBanks {
    fn read_coils(&mut self, start: u16, values: &mut [bool]) -> AccessResult {
        copy_range(&self.coils, start, values)
    }

    fn read_discrete_inputs(&mut self, start: u16, values: &mut [bool]) -> AccessResult {
        copy_range(&self.discrete_inputs, start, values)
    }

    fn read_holding_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult {
        copy_range(&self.holding_registers, start, values)
    }

    fn read_input_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult {
        copy_range(&self.input_registers, start, values)
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> AccessResult {
        store(&mut self.coils, address, value)
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> AccessResult {
        store(&mut self.holding_registers, address, value)
    }

    // Whole-range check first so a rejected request leaves the bank untouched.
    fn write_multiple_coils(&mut self, start: u16, values: &[bool]) -> AccessResult {
        let start = usize::from(start);
        self.coils
            .get_mut(start..start + values.len())
            .ok_or(ExceptionCode::IllegalDataAddress)?
            .copy_from_slice(values);
        Ok(())
    }

    fn write_multiple_registers(&mut self, start: u16, values: &[u16]) -> AccessResult {
        let start = usize::from(start);
        self.holding_registers
            .get_mut(start..start + values.len())
            .ok_or(ExceptionCode::IllegalDataAddress)?
            .copy_from_slice(values);
        Ok(())
    }
}
