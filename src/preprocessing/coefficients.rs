// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Compiled-in coefficients of the ADC filter chain
//!
//! | Stage | Design |
//! |-------|--------|
//! | 0–1 | 4th-order Butterworth low-pass, 500 Hz cutoff |
//! | 2–11 | Notches at 50 Hz and harmonics up to 500 Hz, Q = 10 |
//!
//! Every section is normalised to unity DC gain, so a constant input settles
//! to the same constant output.

use super::biquad::BiquadCoefficients;

/// Sample rate the coefficients were designed for.
pub const SAMPLE_RATE_HZ: u32 = 10_000;

pub const LOWPASS_CUTOFF_HZ: f32 = 500.0;
pub const MAINS_FREQUENCY_HZ: f32 = 50.0;
pub const NOTCH_Q: f32 = 10.0;

pub const LOWPASS_STAGES: usize = 2;
pub const NOTCH_STAGES: usize = 10;
pub const NUM_STAGES: usize = LOWPASS_STAGES + NOTCH_STAGES;

/// Centre frequencies of the notch stages.
pub const NOTCH_FREQUENCIES_HZ: [f32; NOTCH_STAGES] =
    [50.0, 100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0, 450.0, 500.0];

const fn notch(b0: f32, b1: f32, a1: f32, a2: f32) -> BiquadCoefficients {
    BiquadCoefficients::new(b0, b1, b0, a1, a2)
}

/// The full cascade, low-pass first.
#[rustfmt::skip]
pub const FILTER_CHAIN: [BiquadCoefficients; NUM_STAGES] = [
    BiquadCoefficients::new(
        0.019036831587823877, 0.038073663175647754, 0.019036831587823877,
        -1.4796742169311934, 0.5558215432824889,
    ),
    BiquadCoefficients::new(
        0.021883851967943013, 0.043767703935886026, 0.021883851967943013,
        -1.700964331943526, 0.788499739815298,
    ),
    notch(1.0009294093002048, -2.0008710221171024, -1.9958730782642033, 0.9968608747475105),
    notch(0.9993592299758098, -1.9947744456347083, -1.98978266998031, 0.9937266842972214),
    notch(0.9977894623926329, -1.9867224748797212, -1.9817409787435885, 0.990597428649133),
    notch(0.996220107160158, -1.9767292281173545, -1.9717621216002836, 0.987473107803245),
    notch(0.994651165132936, -1.96481071752234, -1.9598621090160258, 0.9843537217595579),
    notch(0.9930826374113232, -1.9509848272983277, -1.9460588229937525, 0.9812392705180711),
    notch(0.9915145253428467, -1.9352712899756501, -1.9303719933687415, 0.9781297540787848),
    notch(0.989946830523793, -1.917691660916009, -1.9128231723101223, 0.9750251724416991),
    notch(0.9883795548010862, -1.8982692910553423, -1.8934357070599839, 0.9719255256068139),
    notch(0.9868127002744672, -1.8770292979176966, -1.8722347109428914, 0.9688308135741293),
];

/// Design a unity-DC-gain notch at `frequency` for sample rate `sample_rate`.
///
/// Zeros sit on the unit circle at the notch frequency; poles sit at radius
/// `r = 1 − π·(f/Q)/fs`, capped at 0.999.
pub fn design_notch(frequency: f64, sample_rate: f64, q: f64) -> BiquadCoefficients {
    let w0 = 2.0 * std::f64::consts::PI * frequency / sample_rate;
    let bandwidth = frequency / q;
    let r = (1.0 - std::f64::consts::PI * bandwidth / sample_rate).min(0.999);
    let cos_w0 = w0.cos();

    let (b0, b1, b2) = (1.0, -2.0 * cos_w0, 1.0);
    let (a1, a2) = (-2.0 * r * cos_w0, r * r);
    let gain = (b0 + b1 + b2) / (1.0 + a1 + a2);

    BiquadCoefficients::new(
        (b0 / gain) as f32,
        (b1 / gain) as f32,
        (b2 / gain) as f32,
        a1 as f32,
        a2 as f32,
    )
}
