// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial line (RTU or ASCII) configuration
//!
//! The line parameters describe the tty; they also set the RTU character
//! timing. Framing defaults follow the Modbus serial line recommendation:
//! 8 data bits for RTU, 7 for ASCII, two stop bits without parity.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, SerialPortBuilder, StopBits};

use crate::modbus::{ContextConfig, Parity, Protocol, SerialSettings, Transport};
use crate::modbus::rtu::calc_interframe_delay_us;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Flag to enable or disable the serial slave.
    pub enabled: bool,

    /// Serial device path, for example `/dev/ttyUSB0`.
    pub device: String,

    /// `rtu` or `ascii`.
    pub protocol: Protocol,

    pub baud_rate: u32,

    /// 8 for RTU, 7 or 8 for ASCII.
    pub data_bits: u8,

    pub parity: Parity,

    /// 1 or 2. Two stop bits replace the missing parity bit.
    pub stop_bits: u8,

    /// Age after which an incomplete ASCII frame is dropped.
    pub ascii_frame_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: "/dev/ttyUSB0".to_string(),
            protocol: Protocol::Rtu,
            baud_rate: 19200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 2,
            ascii_frame_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    /// Dispatcher configuration for this line, answering as `unit_id`.
    pub fn context_config(&self, unit_id: u8) -> ContextConfig {
        ContextConfig {
            unit_id,
            inter_frame_delay_us: calc_interframe_delay_us(self.baud_rate),
            transport: Transport::Serial(SerialSettings {
                baud_rate: self.baud_rate,
                data_bits: self.data_bits,
                stop_bits: self.stop_bits,
                parity: self.parity,
            }),
            ..ContextConfig::default_for(self.protocol)
        }
    }

    /// Port settings for the device: baud rate, data bits, parity, stop bits.
    ///
    /// ### Errors
    ///
    /// Returns an error for data bits other than 7 or 8, or stop bits other
    /// than 1 or 2.
    pub fn port_builder(&self) -> Result<SerialPortBuilder> {
        Ok(tokio_serial::new(self.device.as_str(), self.baud_rate)
            .data_bits(self.port_data_bits()?)
            .parity(self.port_parity())
            .stop_bits(self.port_stop_bits()?))
    }

    fn port_data_bits(&self) -> Result<DataBits> {
        match self.data_bits {
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            bits => bail!("Unsupported serial data bits: {}", bits),
        }
    }

    fn port_parity(&self) -> tokio_serial::Parity {
        match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }

    fn port_stop_bits(&self) -> Result<StopBits> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            bits => bail!("Unsupported serial stop bits: {}", bits),
        }
    }

    pub fn ascii_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.ascii_frame_timeout_ms)
    }

    /// Receive poll period: the RTU inter-frame delay, or a coarse tick for
    /// ASCII where frames end on LF.
    pub fn poll_interval(&self) -> Duration {
        match self.protocol {
            Protocol::Ascii => Duration::from_millis(10),
            _ => Duration::from_micros(u64::from(calc_interframe_delay_us(self.baud_rate))),
        }
    }
}
