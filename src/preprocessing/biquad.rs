// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Second-order IIR sections
//!
//! Sections are evaluated in Direct Form II Transposed:
//!
//! ```text
//! y  = b0·x + z1
//! z1 = b1·x − a1·y + z2
//! z2 = b2·x − a2·y
//! ```
//!
//! with `a0` normalised to 1.

/// Coefficients of one biquad section, `a0 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoefficients {
    pub const fn new(b0: f32, b1: f32, b2: f32, a1: f32, a2: f32) -> Self {
        Self { b0, b1, b2, a1, a2 }
    }

    /// Pass-through section.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 0.0)
    }

    /// Gain of the section at DC.
    pub fn dc_gain(&self) -> f32 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

// Subnormal state values are flushed so a decaying filter never falls onto
// the slow floating-point path.
fn flush(value: f32) -> f32 {
    if value.abs() < f32::MIN_POSITIVE {
        0.0
    } else {
        value
    }
}

/// One biquad section with its two-sample state.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    coefficients: BiquadCoefficients,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub const fn new(coefficients: BiquadCoefficients) -> Self {
        Self {
            coefficients,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn coefficients(&self) -> &BiquadCoefficients {
        &self.coefficients
    }

    /// Filter one sample.
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let c = &self.coefficients;
        let y = c.b0 * x + self.z1;
        self.z1 = flush(c.b1 * x - c.a1 * y + self.z2);
        self.z2 = flush(c.b2 * x - c.a2 * y);
        y
    }

    /// Clear the state history.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn state(&self) -> (f32, f32) {
        (self.z1, self.z2)
    }
}

/// A fixed cascade of `N` sections evaluated in order.
#[derive(Debug, Clone, Copy)]
pub struct BiquadCascade<const N: usize> {
    sections: [Biquad; N],
}

impl<const N: usize> BiquadCascade<N> {
    pub fn new(coefficients: &[BiquadCoefficients; N]) -> Self {
        Self {
            sections: coefficients.map(Biquad::new),
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.sections
            .iter_mut()
            .fold(x, |sample, section| section.process(sample))
    }

    pub fn reset(&mut self) {
        self.sections.iter_mut().for_each(Biquad::reset);
    }

    pub fn sections(&self) -> &[Biquad; N] {
        &self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_passes_samples() {
        let mut section = Biquad::new(BiquadCoefficients::identity());
        for x in [0.0, 1.0, -0.5, 0.25] {
            assert_eq!(section.process(x), x);
        }
    }

    #[test]
    fn test_impulse_response_of_one_pole_section() {
        // y[n] = x[n] + 0.5·y[n-1]
        let mut section = Biquad::new(BiquadCoefficients::new(1.0, 0.0, 0.0, -0.5, 0.0));
        let out: Vec<f32> = [1.0, 0.0, 0.0, 0.0]
            .iter()
            .map(|&x| section.process(x))
            .collect();
        assert_eq!(out, vec![1.0, 0.5, 0.25, 0.125]);
        section.reset();
        assert_eq!(section.state(), (0.0, 0.0));
    }

    #[test]
    fn test_cascade_multiplies_dc_gain() {
        let half = BiquadCoefficients::new(0.5, 0.0, 0.0, 0.0, 0.0);
        let mut cascade = BiquadCascade::new(&[half, half]);
        assert_relative_eq!(cascade.process(1.0), 0.25);
        assert_relative_eq!(half.dc_gain(), 0.5);
    }

    #[test]
    fn test_subnormal_state_is_flushed() {
        let mut section = Biquad::new(BiquadCoefficients::new(1.0, 0.0, 0.0, -0.5, 0.0));
        section.process(1.0);
        for _ in 0..400 {
            section.process(0.0);
        }
        assert_eq!(section.state(), (0.0, 0.0));
    }
}
