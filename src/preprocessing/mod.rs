// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Signal preprocessing module
//!
//! Continuous filtering of the ADC samples: a per-channel cascade of biquad
//! sections (4th-order low-pass plus mains notches) with coefficients fixed
//! at build time for a 10 kHz sample rate.

pub mod adc_filter;
pub mod biquad;
pub mod coefficients;

pub use adc_filter::{AdcFilter, NUM_CHANNELS};
pub use biquad::{Biquad, BiquadCascade, BiquadCoefficients};
