// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-channel ADC filter context
//!
//! Each ADC channel owns an independent copy of the [`FILTER_CHAIN`] cascade.
//! A channel that has not been initialized, or a channel index out of range,
//! passes samples through unchanged.

use super::biquad::BiquadCascade;
use super::coefficients::{FILTER_CHAIN, NUM_STAGES, SAMPLE_RATE_HZ};

/// Number of ADC channels sampled per sequence.
pub const NUM_CHANNELS: usize = 6;

#[derive(Debug, Clone, Copy)]
struct ChannelFilter {
    cascade: BiquadCascade<NUM_STAGES>,
    initialized: bool,
}

impl ChannelFilter {
    fn new() -> Self {
        Self {
            cascade: BiquadCascade::new(&FILTER_CHAIN),
            initialized: false,
        }
    }
}

/// Filter state for all ADC channels.
#[derive(Debug, Clone)]
pub struct AdcFilter {
    channels: [ChannelFilter; NUM_CHANNELS],
}

impl Default for AdcFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcFilter {
    /// Create an uninitialized context; call [`init`](Self::init) before use.
    pub fn new() -> Self {
        Self {
            channels: [ChannelFilter::new(); NUM_CHANNELS],
        }
    }

    /// Clear every channel's history and mark all channels initialized.
    pub fn init(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.cascade.reset();
            channel.initialized = true;
        }
    }

    /// Filter one sample of `channel`.
    ///
    /// Returns `input` unchanged for an out-of-range or uninitialized channel.
    #[inline]
    pub fn process_sample(&mut self, channel: usize, input: f32) -> f32 {
        match self.channels.get_mut(channel) {
            Some(filter) if filter.initialized => filter.cascade.process(input),
            _ => input,
        }
    }

    /// Filter a block of samples of `channel` into `output`.
    ///
    /// Processes `min(input.len(), output.len())` samples; an uninitialized
    /// channel copies the input through and an out-of-range channel leaves
    /// `output` untouched.
    pub fn process_block(&mut self, channel: usize, input: &[f32], output: &mut [f32]) {
        let Some(filter) = self.channels.get_mut(channel) else {
            return;
        };
        for (out, &x) in output.iter_mut().zip(input) {
            *out = if filter.initialized {
                filter.cascade.process(x)
            } else {
                x
            };
        }
    }

    /// Clear the history of one channel.
    pub fn reset(&mut self, channel: usize) {
        if let Some(filter) = self.channels.get_mut(channel) {
            filter.cascade.reset();
        }
    }

    pub fn reset_all(&mut self) {
        for filter in self.channels.iter_mut() {
            filter.cascade.reset();
        }
    }

    pub fn is_initialized(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|filter| filter.initialized)
    }

    pub const fn num_stages() -> usize {
        NUM_STAGES
    }

    pub const fn sample_rate() -> u32 {
        SAMPLE_RATE_HZ
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn tone(frequency: f32, samples: usize) -> Vec<f32> {
        let fs = AdcFilter::sample_rate() as f32;
        (0..samples)
            .map(|n| 0.5 + 0.4 * (2.0 * PI * frequency * n as f32 / fs).sin())
            .collect()
    }

    fn ripple(signal: &[f32]) -> f32 {
        let max = signal.iter().cloned().fold(f32::MIN, f32::max);
        let min = signal.iter().cloned().fold(f32::MAX, f32::min);
        max - min
    }

    #[test]
    fn test_constants() {
        assert_eq!(AdcFilter::num_stages(), 12);
        assert_eq!(AdcFilter::sample_rate(), 10_000);
    }

    #[test]
    fn test_uninitialized_passes_through() {
        let mut filter = AdcFilter::new();
        assert!(!filter.is_initialized(0));
        assert_eq!(filter.process_sample(0, 0.75), 0.75);

        let mut out = [0.0f32; 3];
        filter.process_block(1, &[0.1, 0.2, 0.3], &mut out);
        assert_eq!(out, [0.1, 0.2, 0.3]);

        filter.init();
        assert!(filter.is_initialized(5));
        assert!(!filter.is_initialized(NUM_CHANNELS));
        assert_eq!(filter.process_sample(NUM_CHANNELS, 0.75), 0.75);
    }

    #[test]
    fn test_dc_settles_to_input() {
        let mut filter = AdcFilter::new();
        filter.init();
        let mut y = 0.0;
        for _ in 0..20_000 {
            y = filter.process_sample(0, 0.6);
        }
        assert_relative_eq!(y, 0.6, epsilon = 1e-3);
    }

    #[test]
    fn test_mains_is_rejected() {
        let mut filter = AdcFilter::new();
        filter.init();
        let input = tone(50.0, 30_000);
        let mut output = vec![0.0f32; input.len()];
        filter.process_block(2, &input, &mut output);
        let tail = &output[20_000..];
        assert!(ripple(tail) < 0.05 * ripple(&input[20_000..]), "ripple {}", ripple(tail));
    }

    #[test]
    fn test_high_frequency_is_attenuated() {
        let mut filter = AdcFilter::new();
        filter.init();
        let input = tone(3_000.0, 10_000);
        let mut output = vec![0.0f32; input.len()];
        filter.process_block(0, &input, &mut output);
        assert!(ripple(&output[5_000..]) < 0.02);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut filter = AdcFilter::new();
        filter.init();
        for _ in 0..100 {
            filter.process_sample(0, 1.0);
        }
        assert_eq!(filter.process_sample(1, 0.0), 0.0);

        filter.reset(0);
        let mut fresh = AdcFilter::new();
        fresh.init();
        assert_eq!(filter.process_sample(0, 0.3), fresh.process_sample(0, 0.3));

        filter.reset_all();
        assert!(filter.is_initialized(0));
    }
}
