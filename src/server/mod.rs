// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Transport front-ends of the controller: Modbus/TCP and the serial line.

pub mod serial_link;
pub mod tcp_server;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::modbus::{ContextConfig, ModbusContext, Protocol};
use crate::peripherals::SharedDevice;

pub use serial_link::{open_port, SerialLink, SerialLinkSettings};
pub use tcp_server::{lock_context, ModbusTcpServer, ServerSettings, SharedContext};

/// Build the dispatcher context shared by the TCP connections.
///
/// ### Errors
///
/// Fails when `unit_id` is not a valid slave address.
pub fn shared_context(unit_id: u8, device: SharedDevice) -> Result<SharedContext> {
    let config = ContextConfig {
        unit_id,
        ..ContextConfig::default_for(Protocol::Tcp)
    };
    let context = ModbusContext::new(config, device)
        .with_context(|| format!("Invalid Modbus unit id {}", unit_id))?;
    Ok(Arc::new(Mutex::new(context)))
}
