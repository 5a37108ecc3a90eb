// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus/TCP server configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::daemon::pools;
use crate::server::ServerSettings;

/// Configuration for the Modbus/TCP server component.
///
/// # Example
///
/// ```
/// use rust_io_controller::config::ModbusConfig;
///
/// let modbus_config = ModbusConfig {
///     port: 1502,
///     address: "0.0.0.0".to_string(),
///     ..ModbusConfig::default()
/// };
/// assert_eq!(modbus_config.unit_id, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Flag to enable or disable the Modbus/TCP server.
    pub enabled: bool,

    /// The network address the server binds to.
    ///
    /// Use "0.0.0.0" to bind to all IPv4 interfaces.
    pub address: String,

    /// The TCP port the server listens on. 502 is the standard Modbus port.
    pub port: u16,

    /// Slave address answered by this controller (1..=247).
    pub unit_id: u8,

    /// Connections served at once (1..=16); surplus connections are closed.
    pub max_connections: usize,

    /// Upper bound of a socket receive and of a partial frame's lifetime.
    pub receive_timeout_ms: u64,

    /// Period of the hardware → register update.
    pub register_update_interval_ms: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            max_connections: pools::MAX_THREADS,
            receive_timeout_ms: 5000,
            register_update_interval_ms: 100,
        }
    }
}

impl ModbusConfig {
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            max_connections: self.max_connections,
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            update_interval: Duration::from_millis(self.register_update_interval_ms),
        }
    }
}
