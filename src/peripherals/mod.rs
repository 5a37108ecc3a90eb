// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device side of the controller
//!
//! - [`registers`]: address map and the four register banks
//! - [`hardware`]: GPIO, PWM, RTC and tick traits with simulated implementations
//! - [`expander`]: PCF8574/PCF8574A output expanders on the I²C bus
//! - [`adapter`]: periodic pull/push between banks and hardware
//! - [`device`]: Modbus register handlers over the banks

pub mod adapter;
pub mod device;
pub mod expander;
pub mod hardware;
pub mod registers;

pub use adapter::PeripheralAdapters;
pub use device::{DeviceCallbacks, SharedDevice};
pub use expander::{ExpanderSettings, I2cBus, OutputExpanders, PeripheralError, SimulatedI2cBus};
pub use hardware::{
    AppVersion, DigitalInputPort, MonotonicTick, PwmOutput, RealTimeClock, RtcDateTime,
    SimulatedInputs, SimulatedPwm, SimulatedRtc, TickSource,
};
pub use registers::DeviceRegisters;
