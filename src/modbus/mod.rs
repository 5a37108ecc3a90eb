// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus protocol core
//!
//! Transport-independent PDU codec, the three framing layers and the slave
//! dispatcher of the controller.
//!
//! ## Key Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`crc`], [`lrc`] | Checksums for RTU and ASCII |
//! | [`pdu`] | Encode/decode of FC01–FC06, FC15, FC16 and exceptions |
//! | [`rtu`], [`ascii`], [`tcp`] | Framing and per-frame receive state machines |
//! | [`callbacks`] | [`RegisterAccess`] handlers and [`ModbusHooks`] notifications |
//! | [`dispatcher`] | [`ModbusContext`], one slave instance |
//! | [`serial`] | [`SerialSession`], RTU/ASCII line driver |
//!
//! ## Usage
//!
//! ```
//! use rust_io_controller::modbus::{
//!     tcp, ContextConfig, MemoryBanks, ModbusContext, Protocol,
//! };
//!
//! let banks = MemoryBanks::new(16, 16);
//! let mut ctx = ModbusContext::new(ContextConfig::default_for(Protocol::Tcp), banks).unwrap();
//!
//! let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
//! let adu = tcp::parse_frame(&request).unwrap();
//! let response = ctx.process_adu(&adu).unwrap().unwrap();
//!
//! let mut frame = [0u8; 260];
//! let len = tcp::build_frame(&response, &mut frame).unwrap();
//! assert_eq!(&frame[..len], &[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0, 0, 0, 0]);
//! ```

pub mod ascii;
pub mod bits;
pub mod callbacks;
pub mod crc;
pub mod dispatcher;
pub mod lrc;
pub mod pdu;
pub mod rtu;
pub mod serial;
pub mod tcp;
pub mod types;

pub use callbacks::{AccessResult, MemoryBanks, ModbusHooks, NoHooks, RegisterAccess};
pub use dispatcher::ModbusContext;
pub use serial::SerialSession;
pub use types::{
    Adu, ContextConfig, ExceptionCode, FunctionCode, Mode, ModbusError, ModbusResult, Parity,
    Pdu, Protocol, SerialSettings, State, Statistics, TcpSettings, Transport,
};
