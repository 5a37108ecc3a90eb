// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! ADC acquisition configuration
//!
//! On a host there is no ADC: the sampler converts a simulated signal made of
//! a DC level, a 50 Hz mains component and white noise.

use serde::{Deserialize, Serialize};

use crate::acquisition::{SimulatedSignal, NUM_CHANNELS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Flag to enable or disable the sampler task.
    pub enabled: bool,

    /// Conversion rate of one channel sequence, in Hz.
    ///
    /// The filter coefficients are computed for 10 kHz, so no other value is
    /// accepted.
    pub sample_rate_hz: u32,

    /// DC level of every simulated channel, 0.0..=1.0 of full scale.
    pub simulated_amplitude: f32,

    /// Standard deviation of the simulated white noise.
    pub simulated_noise: f32,

    /// Peak amplitude of the simulated mains interference.
    pub simulated_mains: f32,

    /// Sampler wake-up period; each wake-up converts a batch of sequences.
    pub batch_period_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate_hz: 10_000,
            simulated_amplitude: 0.5,
            simulated_noise: 0.01,
            simulated_mains: 0.05,
            batch_period_ms: 10,
        }
    }
}

impl AcquisitionConfig {
    /// Signal source described by this section, seeded from the OS.
    pub fn signal(&self) -> SimulatedSignal {
        SimulatedSignal::from_entropy(
            [self.simulated_amplitude; NUM_CHANNELS],
            self.simulated_mains,
            self.simulated_noise,
            self.sample_rate_hz,
        )
    }
}
