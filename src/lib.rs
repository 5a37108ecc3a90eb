// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust I/O controller library
//!
//! Modbus RTU, ASCII and TCP slave for a digital and analog I/O controller:
//! 16 digital outputs on I²C expanders, 8 digital inputs, 4 PWM channels,
//! 6 filtered ADC channels, a real-time clock and a firmware version block.
//!
//! | Module | Content |
//! |--------|---------|
//! | [`modbus`] | Checksums, PDU codec, RTU/ASCII/TCP framers, dispatcher |
//! | [`preprocessing`] | Biquad cascade of the ADC channels |
//! | [`acquisition`] | ADC DMA pipeline and its simulated sampler |
//! | [`peripherals`] | Register map, hardware adapters, register handlers |
//! | [`server`] | Modbus/TCP server and serial link |
//! | [`config`] | YAML configuration with schema validation |
//! | [`daemon`] | Task orchestration |

pub mod acquisition;
pub mod config;
pub mod daemon;
pub mod modbus;
pub mod peripherals;
pub mod preprocessing;
pub mod server;
