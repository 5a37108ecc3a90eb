// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Digital outputs on a pair of PCF8574 I²C expanders
//!
//! The 16-bit output word is split across two 8-bit quasi-bidirectional
//! expanders: a PCF8574 (default address 0x20) drives DO0..DO7 and a
//! PCF8574A (default address 0x21) drives DO8..DO15. Each chip is written
//! with a single data byte and read back the same way.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{debug, error};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error("I2C device 0x{address:02X} did not acknowledge")]
    I2cNack { address: u8 },
    #[error("I2C transfer to 0x{address:02X} timed out")]
    I2cTimeout { address: u8 },
    #[error("peripheral not ready")]
    NotReady,
}

/// Blocking I²C master.
#[cfg_attr(test, mockall::automock)]
pub trait I2cBus: Send {
    fn write(&mut self, address: u8, data: &[u8], timeout: Duration) -> Result<(), PeripheralError>;
    fn read(&mut self, address: u8, buffer: &mut [u8], timeout: Duration) -> Result<(), PeripheralError>;
}

/// Addresses and timeout of the expander pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpanderSettings {
    pub low_address: u8,
    pub high_address: u8,
    pub timeout: Duration,
}

impl Default for ExpanderSettings {
    fn default() -> Self {
        Self {
            low_address: 0x20,
            high_address: 0x21,
            timeout: Duration::from_millis(100),
        }
    }
}

/// In-memory bus: every present device latches the last byte written.
#[derive(Debug, Clone, Default)]
pub struct SimulatedI2cBus {
    latches: HashMap<u8, u8>,
    stalled: HashSet<u8>,
}

impl SimulatedI2cBus {
    /// Bus with one device attached at each of `addresses`.
    pub fn with_devices(addresses: &[u8]) -> Self {
        Self {
            latches: addresses.iter().map(|&address| (address, 0)).collect(),
            stalled: HashSet::new(),
        }
    }

    pub fn detach(&mut self, address: u8) {
        self.latches.remove(&address);
    }

    /// Make transfers to `address` time out.
    pub fn stall(&mut self, address: u8) {
        self.stalled.insert(address);
    }

    pub fn latch(&self, address: u8) -> Option<u8> {
        self.latches.get(&address).copied()
    }

    fn device(&mut self, address: u8) -> Result<&mut u8, PeripheralError> {
        if self.stalled.contains(&address) {
            return Err(PeripheralError::I2cTimeout { address });
        }
        self.latches
            .get_mut(&address)
            .ok_or(PeripheralError::I2cNack { address })
    }
}

impl I2cBus for SimulatedI2cBus {
    fn write(&mut self, address: u8, data: &[u8], _timeout: Duration) -> Result<(), PeripheralError> {
        let latch = self.device(address)?;
        if let Some(&last) = data.last() {
            *latch = last;
        }
        Ok(())
    }

    fn read(&mut self, address: u8, buffer: &mut [u8], _timeout: Duration) -> Result<(), PeripheralError> {
        let value = *self.device(address)?;
        buffer.fill(value);
        Ok(())
    }
}

/// Driver of the two output expanders.
pub struct OutputExpanders {
    bus: Box<dyn I2cBus>,
    settings: ExpanderSettings,
    shadow: u16,
}

impl OutputExpanders {
    pub fn new(bus: Box<dyn I2cBus>, settings: ExpanderSettings) -> Self {
        Self {
            bus,
            settings,
            shadow: 0,
        }
    }

    pub fn settings(&self) -> &ExpanderSettings {
        &self.settings
    }

    /// Last word successfully written or read.
    pub fn shadow(&self) -> u16 {
        self.shadow
    }

    /// Drive all 16 outputs.
    ///
    /// ### Errors
    ///
    /// The bus error of the first chip that fails; the shadow is only updated
    /// when both chips accepted the write.
    pub fn write(&mut self, word: u16) -> Result<(), PeripheralError> {
        let [low, high] = word.to_le_bytes();
        let timeout = self.settings.timeout;
        self.bus
            .write(self.settings.low_address, &[low], timeout)
            .inspect_err(|e| error!("Output expander write failed: {}", e))?;
        self.bus
            .write(self.settings.high_address, &[high], timeout)
            .inspect_err(|e| error!("Output expander write failed: {}", e))?;
        self.shadow = word;
        Ok(())
    }

    /// Read the current state of all 16 outputs.
    pub fn read(&mut self) -> Result<u16, PeripheralError> {
        let timeout = self.settings.timeout;
        let mut low = [0u8];
        let mut high = [0u8];
        self.bus.read(self.settings.low_address, &mut low, timeout)?;
        self.bus.read(self.settings.high_address, &mut high, timeout)?;
        self.shadow = u16::from_le_bytes([low[0], high[0]]);
        Ok(self.shadow)
    }

    /// Read-modify-write of a single output.
    ///
    /// ### Returns
    ///
    /// The word written to the expanders.
    pub fn set_output(&mut self, channel: usize, on: bool) -> Result<u16, PeripheralError> {
        if channel >= 16 {
            return Err(PeripheralError::NotReady);
        }
        let current = self.read()?;
        let mask = 1u16 << channel;
        let word = if on { current | mask } else { current & !mask };
        self.write(word)?;
        debug!("DO{} -> {} (outputs 0x{:04X})", channel, on, word);
        Ok(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::{always, eq};

    fn simulated() -> OutputExpanders {
        OutputExpanders::new(
            Box::new(SimulatedI2cBus::with_devices(&[0x20, 0x21])),
            ExpanderSettings::default(),
        )
    }

    #[test]
    fn test_word_split_across_chips() {
        let mut expanders = simulated();
        expanders.write(0xBEEF).unwrap();
        assert_eq!(expanders.read().unwrap(), 0xBEEF);
        assert_eq!(expanders.shadow(), 0xBEEF);
    }

    #[test]
    fn test_set_output_read_modify_write() {
        let mut expanders = simulated();
        expanders.write(0x0100).unwrap();
        assert_eq!(expanders.set_output(0, true).unwrap(), 0x0101);
        assert_eq!(expanders.set_output(8, false).unwrap(), 0x0001);
        assert_eq!(expanders.set_output(16, true), Err(PeripheralError::NotReady));
    }

    #[test]
    fn test_missing_device_naks() {
        let mut bus = SimulatedI2cBus::with_devices(&[0x20]);
        assert_eq!(
            bus.write(0x21, &[1], Duration::from_millis(100)),
            Err(PeripheralError::I2cNack { address: 0x21 })
        );
        bus.stall(0x20);
        let mut buf = [0u8];
        assert_eq!(
            bus.read(0x20, &mut buf, Duration::from_millis(100)),
            Err(PeripheralError::I2cTimeout { address: 0x20 })
        );
    }

    #[test]
    fn test_failed_write_keeps_shadow() {
        let mut bus = MockI2cBus::new();
        bus.expect_write()
            .with(eq(0x20), always(), always())
            .times(1)
            .returning(|_, _, _| Ok(()));
        bus.expect_write()
            .with(eq(0x21), always(), always())
            .times(1)
            .returning(|address, _, _| Err(PeripheralError::I2cNack { address }));

        let mut expanders = OutputExpanders::new(Box::new(bus), ExpanderSettings::default());
        assert_eq!(
            expanders.write(0x1234),
            Err(PeripheralError::I2cNack { address: 0x21 })
        );
        assert_eq!(expanders.shadow(), 0);
    }

    #[test]
    fn test_timeout_is_passed_to_bus() {
        let settings = ExpanderSettings {
            timeout: Duration::from_millis(25),
            ..ExpanderSettings::default()
        };
        let mut bus = MockI2cBus::new();
        bus.expect_read()
            .with(always(), always(), eq(Duration::from_millis(25)))
            .times(2)
            .returning(|_, buffer, _| {
                buffer.fill(0x0F);
                Ok(())
            });
        let mut expanders = OutputExpanders::new(Box::new(bus), settings);
        assert_eq!(expanders.read().unwrap(), 0x0F0F);
    }
}
