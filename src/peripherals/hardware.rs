// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! On-board hardware behind traits
//!
//! Each peripheral the adapters talk to is a small trait with a simulated
//! implementation used by the daemon and the tests:
//!
//! | Trait | Simulation |
//! |-------|------------|
//! | [`DigitalInputPort`] | [`SimulatedInputs`]: 0xA5, bit 0 toggles every 100 reads |
//! | [`PwmOutput`] | [`SimulatedPwm`]: 4 channels, 50 % at 1 kHz, disabled |
//! | [`RealTimeClock`] | [`SimulatedRtc`]: starts 2026-01-28 12:00:00, +1 s per read |
//! | [`TickSource`] | [`MonotonicTick`]: milliseconds since creation |

use std::time::Instant;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use super::expander::PeripheralError;
use super::registers::{PWM_CHANNELS, PWM_DUTY_MAX, PWM_FREQUENCY_MAX, PWM_FREQUENCY_MIN};

/// Calendar date and time as held by the RTC registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RtcDateTime {
    /// Convert to a calendar value; `None` for an impossible date such as
    /// February 30th or a year outside 2000..=2099.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        if !(2000..=2099).contains(&self.year) {
            return None;
        }
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
    }

    pub fn from_naive(value: &NaiveDateTime) -> Self {
        Self {
            year: value.year().clamp(0, i32::from(u16::MAX)) as u16,
            month: value.month() as u8,
            day: value.day() as u8,
            hour: value.hour() as u8,
            minute: value.minute() as u8,
            second: value.second() as u8,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.to_naive().is_some()
    }
}

/// Firmware identification published in the register banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u32,
}

impl AppVersion {
    pub const CURRENT: AppVersion = AppVersion {
        major: 1,
        minor: 0,
        patch: 0,
        build: 1,
    };
}

/// The eight GPIO digital inputs.
pub trait DigitalInputPort: Send {
    /// Read all inputs, bit `n` is DI`n`.
    fn read_all(&mut self) -> Result<u8, PeripheralError>;
}

/// Four-channel PWM timer.
///
/// Setters clamp out-of-range values and ignore invalid channels.
pub trait PwmOutput: Send {
    fn set_enabled(&mut self, channel: usize, enabled: bool);
    fn is_enabled(&self, channel: usize) -> bool;
    fn set_duty_cycle(&mut self, channel: usize, duty: u16);
    fn duty_cycle(&self, channel: usize) -> u16;
    fn set_frequency(&mut self, channel: usize, frequency: u32);
    fn frequency(&self, channel: usize) -> u32;
}

pub trait RealTimeClock: Send {
    fn now(&mut self) -> RtcDateTime;
    fn set(&mut self, value: RtcDateTime);
}

/// Kernel tick counter, 1 kHz, wrapping at 32 bits.
pub trait TickSource: Send + Sync {
    fn ticks(&self) -> u32;
}

#[derive(Debug, Clone)]
pub struct SimulatedInputs {
    state: u8,
    reads: u32,
}

impl Default for SimulatedInputs {
    fn default() -> Self {
        Self::new(0xA5)
    }
}

impl SimulatedInputs {
    pub fn new(initial: u8) -> Self {
        Self {
            state: initial,
            reads: 0,
        }
    }
}

impl DigitalInputPort for SimulatedInputs {
    fn read_all(&mut self) -> Result<u8, PeripheralError> {
        self.reads = self.reads.wrapping_add(1);
        if self.reads % 100 == 0 {
            self.state ^= 0x01;
        }
        Ok(self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PwmChannel {
    enabled: bool,
    duty: u16,
    frequency: u32,
}

#[derive(Debug, Clone)]
pub struct SimulatedPwm {
    channels: [PwmChannel; PWM_CHANNELS],
}

impl Default for SimulatedPwm {
    fn default() -> Self {
        Self {
            channels: [PwmChannel {
                enabled: false,
                duty: 5_000,
                frequency: 1_000,
            }; PWM_CHANNELS],
        }
    }
}

impl PwmOutput for SimulatedPwm {
    fn set_enabled(&mut self, channel: usize, enabled: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.enabled = enabled;
        }
    }

    fn is_enabled(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|ch| ch.enabled)
    }

    fn set_duty_cycle(&mut self, channel: usize, duty: u16) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.duty = duty.min(PWM_DUTY_MAX);
        }
    }

    fn duty_cycle(&self, channel: usize) -> u16 {
        self.channels.get(channel).map_or(0, |ch| ch.duty)
    }

    fn set_frequency(&mut self, channel: usize, frequency: u32) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.frequency = frequency.clamp(PWM_FREQUENCY_MIN, PWM_FREQUENCY_MAX);
        }
    }

    fn frequency(&self, channel: usize) -> u32 {
        self.channels.get(channel).map_or(0, |ch| ch.frequency)
    }
}

/// Clock that advances one second every time it is read.
#[derive(Debug, Clone)]
pub struct SimulatedRtc {
    current: NaiveDateTime,
}

impl Default for SimulatedRtc {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2026, 1, 28)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .unwrap_or_default();
        Self { current: start }
    }
}

impl RealTimeClock for SimulatedRtc {
    fn now(&mut self) -> RtcDateTime {
        self.current += TimeDelta::seconds(1);
        RtcDateTime::from_naive(&self.current)
    }

    fn set(&mut self, value: RtcDateTime) {
        match value.to_naive() {
            Some(datetime) => self.current = datetime,
            None => log::warn!("Ignoring invalid RTC value {:?}", value),
        }
    }
}

/// Millisecond tick counted from creation.
#[derive(Debug, Clone)]
pub struct MonotonicTick {
    origin: Instant,
}

impl Default for MonotonicTick {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TickSource for MonotonicTick {
    fn ticks(&self) -> u32 {
        // Truncation gives the 32-bit wrap of the kernel counter.
        self.origin.elapsed().as_millis() as u32
    }
}
