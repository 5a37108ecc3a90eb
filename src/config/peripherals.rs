// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! I²C output expander configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::peripherals::ExpanderSettings;

/// Addresses of the two PCF8574 expanders driving DO0..DO7 and DO8..DO15.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralsConfig {
    pub expander_low_address: u8,
    pub expander_high_address: u8,
    pub i2c_timeout_ms: u64,
}

impl Default for PeripheralsConfig {
    fn default() -> Self {
        Self {
            expander_low_address: 0x20,
            expander_high_address: 0x21,
            i2c_timeout_ms: 100,
        }
    }
}

impl PeripheralsConfig {
    pub fn expander_settings(&self) -> ExpanderSettings {
        ExpanderSettings {
            low_address: self.expander_low_address,
            high_address: self.expander_high_address,
            timeout: Duration::from_millis(self.i2c_timeout_ms),
        }
    }
}
