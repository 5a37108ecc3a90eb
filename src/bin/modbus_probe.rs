// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus/TCP probe: reads the whole register map of a running controller

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use tokio::time::timeout;
use tokio_modbus::prelude::*;

use rust_io_controller::peripherals::registers::*;

/// Read and decode the register map of an I/O controller
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Modbus server address
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[arg(long, default_value_t = 502)]
    port: u16,

    /// Unit id of the controller
    #[arg(long, default_value_t = 1)]
    unit_id: u8,

    /// Switch a digital output before reading, as CHANNEL=on|off
    #[arg(long, value_parser = parse_output)]
    set_output: Option<(u16, bool)>,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

fn parse_output(arg: &str) -> Result<(u16, bool), String> {
    let (channel, state) = arg
        .split_once('=')
        .ok_or_else(|| "expected CHANNEL=on|off".to_string())?;
    let channel: u16 = channel
        .parse()
        .map_err(|_| format!("invalid channel {}", channel))?;
    if channel > 15 {
        return Err(format!("channel {} out of range 0-15", channel));
    }
    let on = match state {
        "on" | "1" | "true" => true,
        "off" | "0" | "false" => false,
        other => return Err(format!("invalid state {}", other)),
    };
    Ok((channel, on))
}

fn bits(values: &[bool]) -> String {
    values.iter().map(|&b| if b { '1' } else { '0' }).collect()
}

/// Run one request under the probe timeout and flatten the Modbus result.
async fn request<T, F>(what: &str, limit: Duration, call: F) -> Result<T>
where
    F: std::future::Future<Output = tokio_modbus::Result<T>>,
{
    let response = timeout(limit, call)
        .await
        .with_context(|| format!("{}: request timed out", what))?
        .with_context(|| format!("{}: transport error", what))?;
    response.map_err(|code| anyhow::anyhow!("{}: exception {:?}", what, code))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    let args = Args::parse();

    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .with_context(|| format!("Invalid server address {}:{}", args.address, args.port))?;
    println!("Connecting to Modbus server at {} (unit {})", socket_addr, args.unit_id);

    let mut ctx = tcp::connect_slave(socket_addr, Slave(args.unit_id))
        .await
        .with_context(|| format!("Failed to connect to {}", socket_addr))?;
    let limit = Duration::from_millis(args.timeout_ms);

    if let Some((channel, on)) = args.set_output {
        debug!("Writing coil {} = {}", channel, on);
        request("write coil", limit, ctx.write_single_coil(channel, on)).await?;
        println!("DO{} set {}", channel, if on { "on" } else { "off" });
    }

    let coils = request("read coils", limit, ctx.read_coils(0, COIL_COUNT as u16)).await?;
    let inputs = request(
        "read discrete inputs",
        limit,
        ctx.read_discrete_inputs(0, DISCRETE_INPUT_MAX_ADDRESS + 1),
    )
    .await?;
    let holding = request(
        "read holding registers",
        limit,
        ctx.read_holding_registers(0, HR_MAX_ADDRESS + 1),
    )
    .await?;
    let input_regs = request(
        "read input registers",
        limit,
        ctx.read_input_registers(0, IR_MAX_ADDRESS + 1),
    )
    .await?;

    let word = |high: u16, low: u16| {
        (u32::from(holding[usize::from(high)]) << 16) | u32::from(holding[usize::from(low)])
    };
    let hr = |address: u16| holding[usize::from(address)];
    let ir = |address: u16| input_regs[usize::from(address)];
    let mirror = usize::from(COIL_INPUT_MIRROR_BASE);
    let pwm_enable = usize::from(COIL_PWM_ENABLE_BASE);

    println!("Digital outputs DO0..DO15: {}", bits(&coils[..DIGITAL_OUTPUTS]));
    println!("Digital inputs  DI0..DI7:  {}", bits(&inputs));
    println!(
        "Input mirrors   {}..{}:    {}",
        mirror,
        mirror + DIGITAL_INPUTS - 1,
        bits(&coils[mirror..mirror + DIGITAL_INPUTS])
    );

    for channel in 0..PWM_CHANNELS {
        println!(
            "PWM{}: {} duty {:.2}% frequency {} Hz",
            channel,
            if coils[pwm_enable + channel] { "enabled " } else { "disabled" },
            f32::from(hr(pwm_duty_address(channel))) / 100.0,
            word(
                pwm_frequency_high_address(channel),
                pwm_frequency_low_address(channel)
            )
        );
    }

    for channel in 0..ADC_REGISTERS as u16 {
        println!(
            "ADC{}: {} mV (raw {})",
            channel,
            hr(HR_ADC_BASE + channel),
            ir(IR_ADC_BASE + channel)
        );
    }

    println!("Tick: {} ms", word(HR_TICK_HIGH, HR_TICK_LOW));
    println!(
        "RTC: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        hr(HR_RTC_YEAR),
        hr(HR_RTC_MONTH),
        hr(HR_RTC_DAY),
        hr(HR_RTC_HOUR),
        hr(HR_RTC_MINUTE),
        hr(HR_RTC_SECOND)
    );
    let build = (u32::from(ir(IR_BUILD_HIGH)) << 16) | u32::from(ir(IR_BUILD_LOW));
    println!(
        "Firmware: {}.{}.{} build {}",
        ir(IR_VERSION_MAJOR),
        ir(IR_VERSION_MINOR),
        ir(IR_VERSION_PATCH),
        build
    );

    Ok(())
}
