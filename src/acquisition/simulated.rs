// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated ADC hardware
//!
//! [`SimulatedDma`] stands in for the ADC + circular DMA control surface and
//! [`SimulatedSignal`] produces the conversion results: a DC level per
//! channel, a 50 Hz mains component and Gaussian white noise.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{AcquisitionError, AdcDmaBackend, ADC_FULL_SCALE, NUM_CHANNELS};

#[derive(Debug, Default)]
struct DmaState {
    active: AtomicBool,
    start_count: AtomicU32,
    reinit_count: AtomicU32,
    fail_next_reinit: AtomicBool,
}

/// DMA backend that only tracks its state; clones share it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDma {
    state: Arc<DmaState>,
}

impl SimulatedDma {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    pub fn start_count(&self) -> u32 {
        self.state.start_count.load(Ordering::Relaxed)
    }

    pub fn reinit_count(&self) -> u32 {
        self.state.reinit_count.load(Ordering::Relaxed)
    }

    /// Make the next linked-list rebuild fail once.
    pub fn fail_next_reinit(&self) {
        self.state.fail_next_reinit.store(true, Ordering::Release);
    }
}

impl AdcDmaBackend for SimulatedDma {
    fn start(&mut self) -> Result<(), AcquisitionError> {
        self.state.active.store(true, Ordering::Release);
        self.state.start_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.active.store(false, Ordering::Release);
    }

    fn reinit_linked_list(&mut self) -> Result<(), AcquisitionError> {
        if self.state.fail_next_reinit.swap(false, Ordering::AcqRel) {
            return Err(AcquisitionError::LinkedList(
                "simulated descriptor fault".to_string(),
            ));
        }
        self.state.reinit_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Synthetic analog front-end.
///
/// Each channel `k` carries a DC level, a mains sine whose phase is shifted by
/// `k·60°`, and Gaussian noise. Amplitudes are fractions of full scale.
pub struct SimulatedSignal {
    levels: [f32; NUM_CHANNELS],
    mains_amplitude: f32,
    mains_frequency: f32,
    noise_amplitude: f32,
    sample_rate: f32,
    sample_index: u64,
    rng: StdRng,
}

impl SimulatedSignal {
    /// ### Parameters
    ///
    /// * `levels` - DC level of each channel, 0.0..=1.0
    /// * `mains_amplitude` - Peak amplitude of the mains component
    /// * `noise_amplitude` - Standard deviation of the white noise
    /// * `sample_rate` - Conversion rate in Hz
    /// * `seed` - Seed of the noise generator
    pub fn new(
        levels: [f32; NUM_CHANNELS],
        mains_amplitude: f32,
        noise_amplitude: f32,
        sample_rate: u32,
        seed: u64,
    ) -> Self {
        Self {
            levels,
            mains_amplitude,
            mains_frequency: 50.0,
            noise_amplitude,
            sample_rate: sample_rate.max(1) as f32,
            sample_index: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed the noise generator from the operating system.
    pub fn from_entropy(
        levels: [f32; NUM_CHANNELS],
        mains_amplitude: f32,
        noise_amplitude: f32,
        sample_rate: u32,
    ) -> Self {
        let seed = rand::rng().random();
        Self::new(levels, mains_amplitude, noise_amplitude, sample_rate, seed)
    }

    pub fn set_mains_frequency(&mut self, frequency: f32) {
        self.mains_frequency = frequency;
    }

    pub fn levels(&self) -> &[f32; NUM_CHANNELS] {
        &self.levels
    }

    // Box-Muller transform of two uniform draws.
    fn gaussian(&mut self) -> f32 {
        let u1: f32 = self.rng.random_range(f32::EPSILON..1.0);
        let u2: f32 = self.rng.random();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// Produce the next conversion sequence as 12-bit codes.
    pub fn next_sequence(&mut self) -> [u16; NUM_CHANNELS] {
        let t = self.sample_index as f32 / self.sample_rate;
        // Keep the phase argument bounded over long runs.
        let phase = 2.0 * PI * (self.mains_frequency * t).fract();
        self.sample_index = self.sample_index.wrapping_add(1);

        let mut codes = [0u16; NUM_CHANNELS];
        for (channel, code) in codes.iter_mut().enumerate() {
            let shift = channel as f32 * PI / 3.0;
            let noise = if self.noise_amplitude > 0.0 {
                self.noise_amplitude * self.gaussian()
            } else {
                0.0
            };
            let value =
                self.levels[channel] + self.mains_amplitude * (phase + shift).sin() + noise;
            let scaled = (value.clamp(0.0, 1.0) * f32::from(ADC_FULL_SCALE)).round();
            *code = scaled as u16;
        }
        codes
    }
}
