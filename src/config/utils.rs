// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::Config;
use crate::modbus::Protocol;
use crate::preprocessing::AdcFilter;

/// Lowest and highest 7-bit I²C addresses outside the reserved ranges.
const I2C_ADDRESS_MIN: u8 = 0x08;
const I2C_ADDRESS_MAX: u8 = 0x77;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_io_controller --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");

    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Bind address**: the Modbus address is an IP address or `localhost`
/// - **Unit id**: 1..=247, 0 being the broadcast address
/// - **Connections**: 1..=16
/// - **Serial line**: RTU or ASCII only, 7 data bits only with ASCII, 1 or 2 stop bits
/// - **Expanders**: two distinct addresses in 0x08..=0x77
/// - **Sample rate**: equal to the rate the filter coefficients are computed for
///
/// # Returns
///
/// * `Ok(())` if all validations pass
/// * `Err(anyhow::Error)` with descriptive message if any validation fails
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let modbus = &config.modbus;
    if !is_valid_ip_address(&modbus.address) {
        anyhow::bail!("Invalid Modbus bind address: {}", modbus.address);
    }
    if !(1..=247).contains(&modbus.unit_id) {
        anyhow::bail!(
            "Invalid Modbus unit id {}: must be in 1..=247",
            modbus.unit_id
        );
    }
    if !(1..=16).contains(&modbus.max_connections) {
        anyhow::bail!(
            "Invalid max_connections {}: must be in 1..=16",
            modbus.max_connections
        );
    }
    if modbus.receive_timeout_ms == 0 || modbus.register_update_interval_ms == 0 {
        anyhow::bail!("Modbus timeouts and intervals must be positive");
    }

    let serial = &config.serial;
    if serial.protocol == Protocol::Tcp {
        anyhow::bail!("Serial protocol must be rtu or ascii");
    }
    match (serial.protocol, serial.data_bits) {
        (Protocol::Ascii, 7 | 8) | (Protocol::Rtu, 8) => {}
        (protocol, bits) => {
            anyhow::bail!("{} data bits are not valid for {:?}", bits, protocol)
        }
    }
    if !matches!(serial.stop_bits, 1 | 2) {
        anyhow::bail!("Invalid stop bits {}: must be 1 or 2", serial.stop_bits);
    }
    if serial.baud_rate == 0 {
        anyhow::bail!("Serial baud rate must be positive");
    }

    let peripherals = &config.peripherals;
    for address in [
        peripherals.expander_low_address,
        peripherals.expander_high_address,
    ] {
        if !(I2C_ADDRESS_MIN..=I2C_ADDRESS_MAX).contains(&address) {
            anyhow::bail!(
                "Invalid I2C expander address 0x{:02X}: must be in 0x{:02X}..=0x{:02X}",
                address,
                I2C_ADDRESS_MIN,
                I2C_ADDRESS_MAX
            );
        }
    }
    if peripherals.expander_low_address == peripherals.expander_high_address {
        anyhow::bail!(
            "Both I2C expanders use address 0x{:02X}",
            peripherals.expander_low_address
        );
    }

    if config.acquisition.sample_rate_hz != AdcFilter::sample_rate() {
        anyhow::bail!(
            "Unsupported sample rate {} Hz: the filters are designed for {} Hz",
            config.acquisition.sample_rate_hz,
            AdcFilter::sample_rate()
        );
    }

    Ok(())
}
