// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Scheduled exchange between the register banks and the hardware
//!
//! - **Pull** ([`PeripheralAdapters::update_registers`]): digital inputs,
//!   filtered ADC values, system tick, RTC, firmware version and PWM enable
//!   state flow into the banks.
//! - **Push** ([`PeripheralAdapters::apply_outputs`]): digital output coils go
//!   to the I²C expanders, PWM enable/duty/frequency to the timer, and a
//!   changed RTC value to the clock.
//!
//! The adapters are the only owner of the expander bus.

use std::sync::Arc;

use log::{debug, warn};

use super::expander::{ExpanderSettings, OutputExpanders, PeripheralError, SimulatedI2cBus};
use super::hardware::{
    AppVersion, DigitalInputPort, MonotonicTick, PwmOutput, RealTimeClock, RtcDateTime,
    SimulatedInputs, SimulatedPwm, SimulatedRtc, TickSource,
};
use super::registers::{
    DeviceRegisters, ADC_REGISTERS, PWM_CHANNELS, PWM_DUTY_MAX, PWM_FREQUENCY_MAX,
    PWM_FREQUENCY_MIN,
};
use crate::acquisition::{AdcPipeline, ADC_FULL_SCALE};

/// Convert a normalised filter output to a 12-bit code.
pub fn to_adc_code(value: f32) -> u16 {
    let scaled = value * f32::from(ADC_FULL_SCALE);
    // `as` saturates, which also maps NaN and negatives to 0.
    (scaled as u16).min(ADC_FULL_SCALE)
}

/// The hardware set driven by the register banks.
pub struct PeripheralAdapters {
    inputs: Box<dyn DigitalInputPort>,
    outputs: OutputExpanders,
    pwm: Box<dyn PwmOutput>,
    rtc: Box<dyn RealTimeClock>,
    tick: Box<dyn TickSource>,
    adc: Option<Arc<AdcPipeline>>,
    version: AppVersion,
    last_rtc: Option<RtcDateTime>,
}

impl PeripheralAdapters {
    pub fn new(
        inputs: Box<dyn DigitalInputPort>,
        outputs: OutputExpanders,
        pwm: Box<dyn PwmOutput>,
        rtc: Box<dyn RealTimeClock>,
        tick: Box<dyn TickSource>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            pwm,
            rtc,
            tick,
            adc: None,
            version: AppVersion::CURRENT,
            last_rtc: None,
        }
    }

    /// Adapters on simulated hardware, with both expanders present on the bus.
    pub fn simulated(settings: ExpanderSettings) -> Self {
        let bus = SimulatedI2cBus::with_devices(&[settings.low_address, settings.high_address]);
        Self::new(
            Box::new(SimulatedInputs::default()),
            OutputExpanders::new(Box::new(bus), settings),
            Box::new(SimulatedPwm::default()),
            Box::new(SimulatedRtc::default()),
            Box::new(MonotonicTick::default()),
        )
    }

    /// Attach the ADC pipeline the ADC registers are fed from.
    pub fn with_adc(mut self, adc: Arc<AdcPipeline>) -> Self {
        self.adc = Some(adc);
        self
    }

    pub fn with_version(mut self, version: AppVersion) -> Self {
        self.version = version;
        self
    }

    pub fn adc(&self) -> Option<&Arc<AdcPipeline>> {
        self.adc.as_ref()
    }

    pub fn version(&self) -> AppVersion {
        self.version
    }

    pub fn pwm(&self) -> &dyn PwmOutput {
        self.pwm.as_ref()
    }

    pub fn outputs(&self) -> &OutputExpanders {
        &self.outputs
    }

    pub fn ticks(&self) -> u32 {
        self.tick.ticks()
    }

    pub fn read_inputs(&mut self) -> Result<u8, PeripheralError> {
        self.inputs.read_all()
    }

    pub fn set_output(&mut self, channel: usize, on: bool) -> Result<u16, PeripheralError> {
        self.outputs.set_output(channel, on)
    }

    /// Filtered ADC values of the first four channels as 12-bit codes.
    ///
    /// Restarts the acquisition first if it reported an error. All zeros
    /// until the filter has settled or when no pipeline is attached.
    pub fn read_adc_codes(&self) -> [u16; ADC_REGISTERS] {
        let Some(adc) = &self.adc else {
            return [0; ADC_REGISTERS];
        };
        if let Err(e) = adc.check_and_restart() {
            warn!("ADC restart failed: {}", e);
        }
        if !adc.is_settled() {
            return [0; ADC_REGISTERS];
        }
        let values = adc.read_all();
        std::array::from_fn(|channel| to_adc_code(values[channel]))
    }

    /// Fill the register banks from the hardware state at start-up.
    ///
    /// PWM settings and digital outputs are read back so the first push does
    /// not overwrite them with zeros.
    pub fn init_registers(&mut self, regs: &mut DeviceRegisters) {
        for channel in 0..PWM_CHANNELS {
            regs.set_pwm_enabled(channel, self.pwm.is_enabled(channel));
            regs.set_pwm_duty(channel, self.pwm.duty_cycle(channel));
            regs.set_pwm_frequency(channel, self.pwm.frequency(channel));
        }
        match self.outputs.read() {
            Ok(word) => regs.set_digital_outputs(word),
            Err(e) => warn!("Could not read back digital outputs: {}", e),
        }
        self.update_registers(regs);
    }

    /// Pull: hardware → registers.
    pub fn update_registers(&mut self, regs: &mut DeviceRegisters) {
        match self.inputs.read_all() {
            Ok(inputs) => regs.set_digital_inputs(inputs),
            Err(e) => warn!("Digital input read failed: {}", e),
        }

        for (channel, code) in self.read_adc_codes().into_iter().enumerate() {
            regs.set_adc(channel, code);
        }

        regs.set_tick(self.tick.ticks());

        let now = self.rtc.now();
        regs.set_rtc(&now);
        self.last_rtc = Some(now);

        regs.set_version(&self.version);

        for channel in 0..PWM_CHANNELS {
            regs.set_pwm_enabled(channel, self.pwm.is_enabled(channel));
        }
    }

    /// Push: registers → hardware.
    ///
    /// ### Errors
    ///
    /// The expander bus error if the output word could not be written. PWM
    /// and RTC are still applied in that case.
    pub fn apply_outputs(&mut self, regs: &DeviceRegisters) -> Result<(), PeripheralError> {
        let word = regs.digital_outputs();
        let outputs = if word != self.outputs.shadow() {
            debug!("Applying digital outputs 0x{:04X}", word);
            self.outputs.write(word)
        } else {
            Ok(())
        };

        for channel in 0..PWM_CHANNELS {
            self.pwm.set_enabled(channel, regs.pwm_enabled(channel));
            self.pwm
                .set_duty_cycle(channel, regs.pwm_duty(channel).min(PWM_DUTY_MAX));
            self.pwm.set_frequency(
                channel,
                regs.pwm_frequency(channel)
                    .clamp(PWM_FREQUENCY_MIN, PWM_FREQUENCY_MAX),
            );
        }

        let rtc = regs.rtc();
        if self.last_rtc != Some(rtc) {
            if rtc.is_valid() {
                debug!("Setting RTC to {:?}", rtc);
                self.rtc.set(rtc);
                self.last_rtc = Some(rtc);
            } else {
                warn!("Not applying invalid RTC value {:?}", rtc);
            }
        }

        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{SimulatedDma, NUM_CHANNELS, SETTLING_SAMPLES};
    use crate::peripherals::registers::{HR_RTC_MINUTE, HR_RTC_YEAR};

    fn adapters() -> PeripheralAdapters {
        PeripheralAdapters::simulated(ExpanderSettings::default())
    }

    #[test]
    fn test_adc_code_conversion() {
        assert_eq!(to_adc_code(0.0), 0);
        assert_eq!(to_adc_code(0.5), 2047);
        assert_eq!(to_adc_code(1.0), 4095);
        assert_eq!(to_adc_code(1.5), 4095);
        assert_eq!(to_adc_code(-0.2), 0);
        assert_eq!(to_adc_code(f32::NAN), 0);
    }

    #[test]
    fn test_init_reads_back_hardware() {
        let mut adapters = adapters();
        let mut regs = DeviceRegisters::default();
        adapters.init_registers(&mut regs);
        assert_eq!(regs.pwm_duty(0), 5_000);
        assert_eq!(regs.pwm_frequency(3), 1_000);
        assert!(regs.discrete_inputs[0]);
        assert_eq!(regs.holding[usize::from(HR_RTC_YEAR)], 2026);
        assert_eq!(&regs.input[4..9], &[1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_adc_zero_until_settled() {
        let pipeline = Arc::new(AdcPipeline::new(Box::new(SimulatedDma::new())));
        pipeline.start().unwrap();
        let mut adapters = adapters().with_adc(Arc::clone(&pipeline));
        let mut regs = DeviceRegisters::default();

        let samples = [2048u16; NUM_CHANNELS];
        for _ in 0..SETTLING_SAMPLES / 2 {
            pipeline.on_sequence_complete(&samples);
        }
        adapters.update_registers(&mut regs);
        assert_eq!(&regs.input[0..4], &[0, 0, 0, 0]);

        for _ in 0..20_000 {
            pipeline.on_sequence_complete(&samples);
        }
        adapters.update_registers(&mut regs);
        for channel in 0..4 {
            let code = regs.input[channel];
            assert!((2046..=2049).contains(&code), "code {}", code);
            assert_eq!(regs.holding[12 + channel], code);
        }
    }

    #[test]
    fn test_pull_restarts_failed_acquisition() {
        let dma = SimulatedDma::new();
        let pipeline = Arc::new(AdcPipeline::new(Box::new(dma.clone())));
        pipeline.start().unwrap();
        pipeline.on_error();
        let mut adapters = adapters().with_adc(Arc::clone(&pipeline));
        adapters.update_registers(&mut DeviceRegisters::default());
        assert!(pipeline.is_running());
        assert_eq!(pipeline.restart_count(), 1);
    }

    #[test]
    fn test_push_drives_hardware() {
        let mut adapters = adapters();
        let mut regs = DeviceRegisters::default();
        adapters.init_registers(&mut regs);

        regs.set_digital_outputs(0x0201);
        regs.set_pwm_enabled(2, true);
        regs.set_pwm_duty(2, 2_500);
        regs.set_pwm_frequency(2, 2_000_000);
        adapters.apply_outputs(&regs).unwrap();

        assert_eq!(adapters.outputs().shadow(), 0x0201);
        assert!(adapters.pwm().is_enabled(2));
        assert_eq!(adapters.pwm().duty_cycle(2), 2_500);
        assert_eq!(adapters.pwm().frequency(2), 1_000_000);

        regs.set_pwm_frequency(1, 0);
        adapters.apply_outputs(&regs).unwrap();
        assert_eq!(adapters.pwm().frequency(1), 1);
    }

    #[test]
    fn test_changed_rtc_is_applied() {
        let mut adapters = adapters();
        let mut regs = DeviceRegisters::default();
        adapters.init_registers(&mut regs);
        regs.holding[usize::from(HR_RTC_MINUTE)] = 30;
        adapters.apply_outputs(&regs).unwrap();
        adapters.update_registers(&mut regs);
        assert_eq!(regs.holding[usize::from(HR_RTC_MINUTE)], 30);
    }

    #[test]
    fn test_missing_expander_reports_error() {
        let bus = SimulatedI2cBus::with_devices(&[0x20]);
        let mut adapters = PeripheralAdapters::new(
            Box::new(SimulatedInputs::default()),
            OutputExpanders::new(Box::new(bus), ExpanderSettings::default()),
            Box::new(SimulatedPwm::default()),
            Box::new(SimulatedRtc::default()),
            Box::new(MonotonicTick::default()),
        );
        let mut regs = DeviceRegisters::default();
        regs.set_digital_outputs(0xFF00);
        assert_eq!(
            adapters.apply_outputs(&regs),
            Err(PeripheralError::I2cNack { address: 0x21 })
        );
    }
}
