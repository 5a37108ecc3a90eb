// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the I/O controller
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema before deserialization.
//!
//! ## Configuration Structure
//!
//! | Section | Purpose |
//! |---------|---------|
//! | `modbus` | Modbus/TCP server binding, unit id, connection limit, timeouts |
//! | `serial` | Optional RTU/ASCII slave on a serial device |
//! | `acquisition` | ADC sampler and its simulated signal |
//! | `peripherals` | I²C addresses of the output expanders |
//! | `monitor` | Periods of the status and statistics reports |
//!
//! Every section falls back to its defaults when omitted.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_io_controller::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("0.0.0.0".to_string()), // Modbus address
//!     Some(1502),                  // Modbus port
//!     None,                        // Unit id
//!     None,                        // Max connections
//!     false,                       // Disable acquisition
//! );
//!
//! println!("Modbus port: {}", config.modbus.port);
//! ```

pub mod acquisition;
pub mod modbus;
pub mod monitor;
pub mod peripherals;
pub mod serial;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use acquisition::AcquisitionConfig;
pub use modbus::ModbusConfig;
pub use monitor::MonitorConfig;
pub use peripherals::PeripheralsConfig;
pub use serial::SerialConfig;
pub use utils::{is_valid_ip_address, output_config_schema};

/// Root configuration structure of the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Modbus/TCP server settings.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Serial line slave settings. Disabled unless configured.
    #[serde(default)]
    pub serial: SerialConfig,

    /// ADC sampling and filtering.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub peripherals: PeripheralsConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file that
    /// fails schema validation, deserialization or the rules of
    /// [`utils::validate_specific_rules`] leaves a `<name>.sample.yaml` with
    /// the defaults next to it.
    ///
    /// ### Errors
    ///
    /// Returns an error if the file cannot be read or written, is not valid
    /// YAML, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // YAML is validated through its JSON representation
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema_str = include_str!("../../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only explicitly provided values override the loaded configuration.
    ///
    /// # Parameters
    ///
    /// * `modbus_address` - Network address for the Modbus/TCP server to bind to
    /// * `modbus_port` - TCP port for the Modbus/TCP server
    /// * `unit_id` - Slave address answered by the controller
    /// * `max_connections` - Connections served at once
    /// * `no_acquisition` - If true, the ADC sampler is not started
    pub fn apply_args(
        &mut self,
        modbus_address: Option<String>,
        modbus_port: Option<u16>,
        unit_id: Option<u8>,
        max_connections: Option<usize>,
        no_acquisition: bool,
    ) {
        if let Some(address) = modbus_address {
            debug!("Overriding Modbus address from command line: {}", address);
            self.modbus.address = address;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(unit_id) = unit_id {
            debug!("Overriding Modbus unit id from command line: {}", unit_id);
            self.modbus.unit_id = unit_id;
        }
        if let Some(max) = max_connections {
            debug!("Overriding max connections from command line: {}", max);
            self.modbus.max_connections = max;
        }
        if no_acquisition {
            debug!("Disabling acquisition from command line");
            self.acquisition.enabled = false;
        }
    }

    /// Check the rules the schema cannot express, after command line overrides.
    pub fn validate(&self) -> Result<()> {
        utils::validate_specific_rules(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::{Parity, Protocol};

    #[test]
    fn test_partial_sections_use_defaults() {
        let yaml = "modbus:\n  port: 1502\nserial:\n  protocol: ascii\n  data_bits: 7\n  parity: even\n  stop_bits: 1\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.modbus.port, 1502);
        assert_eq!(config.modbus.unit_id, 1);
        assert_eq!(config.serial.protocol, Protocol::Ascii);
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.serial.baud_rate, 19200);
        assert!(config.acquisition.enabled);
        assert_eq!(config.peripherals.expander_high_address, 0x21);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(Some("0.0.0.0".to_string()), Some(1502), Some(9), None, true);
        assert_eq!(config.modbus.address, "0.0.0.0");
        assert_eq!(config.modbus.port, 1502);
        assert_eq!(config.modbus.unit_id, 9);
        assert_eq!(config.modbus.max_connections, 4);
        assert!(!config.acquisition.enabled);
    }
}
