// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device register map
//!
//! ### Coils
//!
//! | Address | Content |
//! |---------|---------|
//! | 0–15 | Digital outputs DO0..DO15 (I²C expanders) |
//! | 16–23 | Mirror of digital inputs DI0..DI7, read-only |
//! | 24–27 | PWM0..PWM3 enable |
//!
//! ### Discrete inputs
//!
//! | Address | Content |
//! |---------|---------|
//! | 0–7 | Digital inputs DI0..DI7 |
//!
//! ### Holding registers
//!
//! | Address | Content |
//! |---------|---------|
//! | 0, 3, 6, 9 | PWM0..3 duty cycle, 0..=10000 (0.01 %) |
//! | 1–2, 4–5, 7–8, 10–11 | PWM0..3 frequency in Hz, high word first |
//! | 12–15 | ADC0..3 (12-bit code, millivolts once settled) |
//! | 16, 17 | System tick low, high |
//! | 18–23 | RTC year, month, day, hour, minute, second |
//! | 24–26 | Firmware version major, minor, patch |
//! | 27–28 | Build number, high word first |
//!
//! ### Input registers
//!
//! | Address | Content |
//! |---------|---------|
//! | 0–3 | ADC0..3 raw 12-bit code |
//! | 4–6 | Firmware version major, minor, patch |
//! | 7–8 | Build number, high word first |

use super::hardware::{AppVersion, RtcDateTime};

pub const DIGITAL_OUTPUTS: usize = 16;
pub const DIGITAL_INPUTS: usize = 8;
pub const PWM_CHANNELS: usize = 4;
pub const ADC_REGISTERS: usize = 4;

pub const COIL_DIGITAL_OUTPUT_BASE: u16 = 0;
pub const COIL_INPUT_MIRROR_BASE: u16 = 16;
pub const COIL_PWM_ENABLE_BASE: u16 = 24;
pub const COIL_MAX_ADDRESS: u16 = 27;
pub const COIL_COUNT: usize = COIL_MAX_ADDRESS as usize + 1;

pub const DISCRETE_INPUT_MAX_ADDRESS: u16 = 7;
pub const DISCRETE_INPUT_COUNT: usize = DISCRETE_INPUT_MAX_ADDRESS as usize + 1;

pub const HR_PWM_BASE: u16 = 0;
/// Registers per PWM channel: duty, frequency high, frequency low.
pub const HR_PWM_STRIDE: u16 = 3;
pub const HR_ADC_BASE: u16 = 12;
pub const HR_TICK_LOW: u16 = 16;
pub const HR_TICK_HIGH: u16 = 17;
pub const HR_RTC_YEAR: u16 = 18;
pub const HR_RTC_MONTH: u16 = 19;
pub const HR_RTC_DAY: u16 = 20;
pub const HR_RTC_HOUR: u16 = 21;
pub const HR_RTC_MINUTE: u16 = 22;
pub const HR_RTC_SECOND: u16 = 23;
pub const HR_VERSION_MAJOR: u16 = 24;
pub const HR_VERSION_MINOR: u16 = 25;
pub const HR_VERSION_PATCH: u16 = 26;
pub const HR_BUILD_HIGH: u16 = 27;
pub const HR_BUILD_LOW: u16 = 28;
pub const HR_MAX_ADDRESS: u16 = 28;
pub const HR_COUNT: usize = HR_MAX_ADDRESS as usize + 1;

pub const IR_ADC_BASE: u16 = 0;
pub const IR_VERSION_MAJOR: u16 = 4;
pub const IR_VERSION_MINOR: u16 = 5;
pub const IR_VERSION_PATCH: u16 = 6;
pub const IR_BUILD_HIGH: u16 = 7;
pub const IR_BUILD_LOW: u16 = 8;
pub const IR_MAX_ADDRESS: u16 = 8;
pub const IR_COUNT: usize = IR_MAX_ADDRESS as usize + 1;

/// Maximum PWM duty cycle (100.00 %).
pub const PWM_DUTY_MAX: u16 = 10_000;
pub const PWM_FREQUENCY_MIN: u32 = 1;
pub const PWM_FREQUENCY_MAX: u32 = 1_000_000;
/// Largest high word of a frequency that can still be in range.
pub const PWM_FREQUENCY_HIGH_MAX: u16 = 0x000F;

pub const fn pwm_duty_address(channel: usize) -> u16 {
    HR_PWM_BASE + channel as u16 * HR_PWM_STRIDE
}

pub const fn pwm_frequency_high_address(channel: usize) -> u16 {
    pwm_duty_address(channel) + 1
}

pub const fn pwm_frequency_low_address(channel: usize) -> u16 {
    pwm_duty_address(channel) + 2
}

/// Role of a holding register inside a PWM channel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmField {
    Duty(usize),
    FrequencyHigh(usize),
    FrequencyLow(usize),
}

/// Map a holding register address to its PWM field, if it is one.
pub fn pwm_field(address: u16) -> Option<PwmField> {
    let end = HR_PWM_BASE + PWM_CHANNELS as u16 * HR_PWM_STRIDE;
    if !(HR_PWM_BASE..end).contains(&address) {
        return None;
    }
    let offset = address - HR_PWM_BASE;
    let channel = usize::from(offset / HR_PWM_STRIDE);
    Some(match offset % HR_PWM_STRIDE {
        0 => PwmField::Duty(channel),
        1 => PwmField::FrequencyHigh(channel),
        _ => PwmField::FrequencyLow(channel),
    })
}

fn split_u32(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, (value & 0xFFFF) as u16)
}

fn join_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// The four register banks of the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegisters {
    pub coils: [bool; COIL_COUNT],
    pub discrete_inputs: [bool; DISCRETE_INPUT_COUNT],
    pub holding: [u16; HR_COUNT],
    pub input: [u16; IR_COUNT],
}

impl Default for DeviceRegisters {
    fn default() -> Self {
        Self {
            coils: [false; COIL_COUNT],
            discrete_inputs: [false; DISCRETE_INPUT_COUNT],
            holding: [0; HR_COUNT],
            input: [0; IR_COUNT],
        }
    }
}

impl DeviceRegisters {
    /// 16-bit output word assembled from the digital output coils.
    pub fn digital_outputs(&self) -> u16 {
        self.coils[..DIGITAL_OUTPUTS]
            .iter()
            .enumerate()
            .fold(0u16, |word, (bit, &on)| if on { word | 1 << bit } else { word })
    }

    pub fn set_digital_outputs(&mut self, word: u16) {
        for (bit, coil) in self.coils[..DIGITAL_OUTPUTS].iter_mut().enumerate() {
            *coil = word & (1 << bit) != 0;
        }
    }

    /// Store the digital input byte in the discrete inputs and the coil mirror.
    pub fn set_digital_inputs(&mut self, inputs: u8) {
        let base = usize::from(COIL_INPUT_MIRROR_BASE);
        for bit in 0..DIGITAL_INPUTS {
            let on = inputs & (1 << bit) != 0;
            self.discrete_inputs[bit] = on;
            self.coils[base + bit] = on;
        }
    }

    pub fn pwm_enabled(&self, channel: usize) -> bool {
        self.coils[usize::from(COIL_PWM_ENABLE_BASE) + channel]
    }

    pub fn set_pwm_enabled(&mut self, channel: usize, enabled: bool) {
        self.coils[usize::from(COIL_PWM_ENABLE_BASE) + channel] = enabled;
    }

    pub fn pwm_duty(&self, channel: usize) -> u16 {
        self.holding[usize::from(pwm_duty_address(channel))]
    }

    pub fn set_pwm_duty(&mut self, channel: usize, duty: u16) {
        self.holding[usize::from(pwm_duty_address(channel))] = duty;
    }

    /// Raw 32-bit frequency as stored, not clamped.
    pub fn pwm_frequency(&self, channel: usize) -> u32 {
        join_u32(
            self.holding[usize::from(pwm_frequency_high_address(channel))],
            self.holding[usize::from(pwm_frequency_low_address(channel))],
        )
    }

    pub fn set_pwm_frequency(&mut self, channel: usize, frequency: u32) {
        let (high, low) = split_u32(frequency);
        self.holding[usize::from(pwm_frequency_high_address(channel))] = high;
        self.holding[usize::from(pwm_frequency_low_address(channel))] = low;
    }

    /// Store one ADC value in both the input and holding banks.
    pub fn set_adc(&mut self, channel: usize, value: u16) {
        self.input[usize::from(IR_ADC_BASE) + channel] = value;
        self.holding[usize::from(HR_ADC_BASE) + channel] = value;
    }

    pub fn set_tick(&mut self, tick: u32) {
        let (high, low) = split_u32(tick);
        self.holding[usize::from(HR_TICK_LOW)] = low;
        self.holding[usize::from(HR_TICK_HIGH)] = high;
    }

    pub fn tick(&self) -> u32 {
        join_u32(
            self.holding[usize::from(HR_TICK_HIGH)],
            self.holding[usize::from(HR_TICK_LOW)],
        )
    }

    pub fn rtc(&self) -> RtcDateTime {
        let field = |address: u16| self.holding[usize::from(address)];
        RtcDateTime {
            year: field(HR_RTC_YEAR),
            month: field(HR_RTC_MONTH) as u8,
            day: field(HR_RTC_DAY) as u8,
            hour: field(HR_RTC_HOUR) as u8,
            minute: field(HR_RTC_MINUTE) as u8,
            second: field(HR_RTC_SECOND) as u8,
        }
    }

    pub fn set_rtc(&mut self, rtc: &RtcDateTime) {
        self.holding[usize::from(HR_RTC_YEAR)] = rtc.year;
        self.holding[usize::from(HR_RTC_MONTH)] = u16::from(rtc.month);
        self.holding[usize::from(HR_RTC_DAY)] = u16::from(rtc.day);
        self.holding[usize::from(HR_RTC_HOUR)] = u16::from(rtc.hour);
        self.holding[usize::from(HR_RTC_MINUTE)] = u16::from(rtc.minute);
        self.holding[usize::from(HR_RTC_SECOND)] = u16::from(rtc.second);
    }

    /// Store the firmware version in both the input and holding banks.
    pub fn set_version(&mut self, version: &AppVersion) {
        let (build_high, build_low) = split_u32(version.build);
        let words = [
            version.major,
            version.minor,
            version.patch,
            build_high,
            build_low,
        ];
        let hr = usize::from(HR_VERSION_MAJOR);
        self.holding[hr..hr + words.len()].copy_from_slice(&words);
        let ir = usize::from(IR_VERSION_MAJOR);
        self.input[ir..ir + words.len()].copy_from_slice(&words);
    }
}
