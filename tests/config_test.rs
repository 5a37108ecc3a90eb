// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::fs;
use std::sync::Once;

use anyhow::Result;
use rust_io_controller::config::Config;
use rust_io_controller::modbus::{Parity, Protocol};
use tempfile::tempdir;

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

#[test]
fn test_missing_file_is_created_with_defaults() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let config = Config::from_file(&config_path)?;
    assert!(config_path.exists(), "Default config file was not written");
    assert_eq!(config.modbus.port, 502);
    assert_eq!(config.modbus.unit_id, 1);
    assert!(!config.serial.enabled);

    // The written defaults pass validation on the next load
    let reloaded = Config::from_file(&config_path)?;
    assert_eq!(reloaded.modbus.address, "127.0.0.1");
    assert_eq!(reloaded.acquisition.sample_rate_hz, 10_000);
    Ok(())
}

#[test]
fn test_save_and_reload() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("controller.yaml");

    let mut config = Config::default();
    config.modbus.port = 1502;
    config.modbus.max_connections = 2;
    config.serial.enabled = true;
    config.serial.protocol = Protocol::Ascii;
    config.serial.data_bits = 7;
    config.serial.parity = Parity::Even;
    config.serial.stop_bits = 1;
    config.peripherals.expander_low_address = 0x38;
    config.peripherals.expander_high_address = 0x39;
    config.save_to_file(&config_path)?;

    let loaded = Config::from_file(&config_path)?;
    assert_eq!(loaded.modbus.port, 1502);
    assert_eq!(loaded.modbus.max_connections, 2);
    assert_eq!(loaded.serial.protocol, Protocol::Ascii);
    assert_eq!(loaded.serial.parity, Parity::Even);
    assert_eq!(loaded.peripherals.expander_low_address, 0x38);
    Ok(())
}

#[test]
fn test_schema_violation_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let invalid_config = r#"
modbus:
  unit_id: 0        # Broadcast address cannot be a slave id
  port: 502
"#;
    fs::write(&config_path, invalid_config)?;

    let result = Config::from_file(&config_path);
    assert!(result.is_err(), "Config loading should have failed");

    let sample_path = config_path.with_extension("sample.yaml");
    assert!(sample_path.exists(), "Sample config file was not created");

    let sample_config = Config::from_file(&sample_path)?;
    assert_eq!(sample_config.modbus.unit_id, 1);
    Ok(())
}

#[test]
fn test_unknown_field_is_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "modbus:\n  prot: 502\n")?;

    assert!(Config::from_file(&config_path).is_err());
    Ok(())
}

#[test]
fn test_specific_rule_violation_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Each value is in range for the schema, but both expanders share an address
    let invalid_config = r#"
peripherals:
  expander_low_address: 32
  expander_high_address: 32
"#;
    fs::write(&config_path, invalid_config)?;

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(
        err.to_string().contains("0x20"),
        "unexpected error: {}",
        err
    );
    assert!(config_path.with_extension("sample.yaml").exists());
    Ok(())
}

#[test]
fn test_rtu_with_seven_data_bits_is_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "serial:\n  protocol: rtu\n  data_bits: 7\n")?;

    assert!(Config::from_file(&config_path).is_err());
    Ok(())
}

#[test]
fn test_type_mismatch_is_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "modbus:\n  port: \"not-an-integer\"\n")?;

    assert!(Config::from_file(&config_path).is_err());
    assert!(config_path.with_extension("sample.yaml").exists());
    Ok(())
}
