// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Interoperability with a third-party Modbus/TCP client

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tokio_modbus::client::{tcp, Reader, Writer};
use tokio_modbus::{ExceptionCode, Slave};

use rust_io_controller::config::Config;
use rust_io_controller::daemon::Daemon;

fn test_config() -> Config {
    let mut config = Config::default();
    config.modbus.port = 0;
    config.monitor.interval_ms = 50;
    config.monitor.statistics_interval_ms = 50;
    config
}

#[tokio::test]
async fn test_client_reads_and_writes_register_map() -> Result<()> {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();

    let mut daemon = Daemon::new();
    daemon.launch(&test_config()).await?;
    let addr = daemon.modbus_addr().expect("Modbus server is enabled");

    let mut ctx = tcp::connect_slave(addr, Slave(1)).await?;

    // Firmware version block in the input registers
    let version = ctx.read_input_registers(4, 5).await??;
    assert_eq!(version, vec![1, 0, 0, 0, 1]);

    // PWM1 duty cycle write and read back
    ctx.write_single_register(3, 7500).await??;
    let duty = ctx.read_holding_registers(3, 1).await??;
    assert_eq!(duty, vec![7500]);

    // Out-of-range duty cycle
    let rejected = ctx.write_single_register(3, 10_001).await?;
    assert_eq!(rejected, Err(ExceptionCode::IllegalDataValue));

    // Outputs DO0..DO3 through FC15
    ctx.write_multiple_coils(0, &[true, false, true, true]).await??;
    let coils = ctx.read_coils(0, 4).await??;
    assert_eq!(coils, vec![true, false, true, true]);
    let shadow = daemon
        .device()
        .expect("device is created on launch")
        .lock()
        .adapters()
        .outputs()
        .shadow();
    assert_eq!(shadow, 0b1101);

    // Digital inputs start at 0xA5
    let inputs = ctx.read_discrete_inputs(1, 7).await??;
    assert_eq!(inputs, vec![false, true, false, false, true, false, true]);

    // Writing an input mirror is refused
    let mirror = ctx.write_single_coil(16, true).await?;
    assert_eq!(mirror, Err(ExceptionCode::IllegalDataAddress));

    // Unknown address
    let missing = ctx.read_input_registers(9, 1).await?;
    assert_eq!(missing, Err(ExceptionCode::IllegalDataAddress));

    drop(ctx);
    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}

#[tokio::test]
async fn test_adc_registers_once_settled() -> Result<()> {
    let mut daemon = Daemon::new();
    daemon.launch(&test_config()).await?;
    let addr = daemon.modbus_addr().expect("Modbus server is enabled");

    // 1024 sequences at 10 kHz take about 100 ms
    let adc = daemon.adc().expect("acquisition is enabled").clone();
    for _ in 0..100 {
        if adc.is_settled() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(adc.is_settled());

    let mut ctx = tcp::connect_slave(addr, Slave(1)).await?;
    // Give the connection one register update after settling
    sleep(Duration::from_millis(150)).await;

    // Simulated level is half scale: about 500 mV and a raw code near 2048
    let millivolts = ctx.read_holding_registers(12, 4).await??;
    for value in &millivolts {
        assert!((400..=600).contains(value), "ADC mV out of range: {:?}", millivolts);
    }
    let raw = ctx.read_input_registers(0, 4).await??;
    for value in &raw {
        assert!((1600..=2500).contains(value), "ADC raw out of range: {:?}", raw);
    }

    drop(ctx);
    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}
