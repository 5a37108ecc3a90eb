// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register handlers of the I/O controller
//!
//! [`DeviceCallbacks`] owns the register banks and the peripheral adapters
//! and implements [`RegisterAccess`] over the address map of
//! [`registers`](super::registers).
//!
//! | Access | Behaviour |
//! |--------|-----------|
//! | Coil read of DI mirrors, discrete input read | GPIO read live, 04 on failure |
//! | Coil write DO0..DO15 | I²C read-modify-write, coil updated on success, 04 on failure |
//! | Coil write DI mirror | 02 |
//! | Holding read of the tick pair | Both halves refreshed from one tick sample |
//! | Holding read of ADC0..3 once settled | Millivolts, stored back |
//! | Holding write of ADC, tick, version, build | 02 |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, warn};

use super::adapter::PeripheralAdapters;
use super::expander::PeripheralError;
use super::registers::*;
use crate::modbus::{AccessResult, ExceptionCode, RegisterAccess};

/// Filtered ADC output as millivolts on a 1 V full scale.
pub fn to_millivolts(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * 1000.0) as u16
}

/// Index range of a request, or `IllegalDataAddress` if it ends past `max`.
fn checked_range(
    start: u16,
    quantity: usize,
    max: u16,
) -> Result<std::ops::Range<usize>, ExceptionCode> {
    let start = usize::from(start);
    let end = start + quantity;
    if quantity == 0 || end > usize::from(max) + 1 {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(start..end)
}

fn overlaps(range: &std::ops::Range<usize>, first: u16, last: u16) -> bool {
    range.start <= usize::from(last) && range.end > usize::from(first)
}

fn in_range(value: u16, min: u16, max: u16) -> Result<(), ExceptionCode> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ExceptionCode::IllegalDataValue)
    }
}

/// 03 unless the two frequency halves form a value in the PWM range.
fn frequency_in_range(high: u16, low: u16) -> Result<(), ExceptionCode> {
    let frequency = (u32::from(high) << 16) | u32::from(low);
    if (PWM_FREQUENCY_MIN..=PWM_FREQUENCY_MAX).contains(&frequency) {
        Ok(())
    } else {
        Err(ExceptionCode::IllegalDataValue)
    }
}

fn device_failure(context: &str, err: PeripheralError) -> ExceptionCode {
    error!("{}: {}", context, err);
    ExceptionCode::SlaveDeviceFailure
}

/// Register banks plus the hardware behind them.
pub struct DeviceCallbacks {
    registers: DeviceRegisters,
    adapters: PeripheralAdapters,
}

impl DeviceCallbacks {
    /// Take ownership of `adapters` and fill the banks from the hardware.
    pub fn new(mut adapters: PeripheralAdapters) -> Self {
        let mut registers = DeviceRegisters::default();
        adapters.init_registers(&mut registers);
        Self {
            registers,
            adapters,
        }
    }

    pub fn registers(&self) -> &DeviceRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut DeviceRegisters {
        &mut self.registers
    }

    pub fn adapters(&self) -> &PeripheralAdapters {
        &self.adapters
    }

    /// Periodic pull of the hardware state into the banks.
    pub fn update_registers(&mut self) {
        self.adapters.update_registers(&mut self.registers);
    }

    /// Push written coils and holding registers to the hardware.
    pub fn apply_outputs(&mut self) -> Result<(), PeripheralError> {
        self.adapters.apply_outputs(&self.registers)
    }

    /// Validate and store one holding register.
    ///
    /// `pending_low` is the low frequency half written by the same request
    /// when `address` is a high half.
    fn store_holding(&mut self, address: u16, value: u16, pending_low: Option<u16>) -> AccessResult {
        match pwm_field(address) {
            Some(PwmField::Duty(_)) => in_range(value, 0, PWM_DUTY_MAX)?,
            Some(PwmField::FrequencyHigh(channel)) => {
                in_range(value, 0, PWM_FREQUENCY_HIGH_MAX)?;
                let low = pending_low.unwrap_or(
                    self.registers.holding[usize::from(pwm_frequency_low_address(channel))],
                );
                frequency_in_range(value, low)?;
            }
            Some(PwmField::FrequencyLow(channel)) => {
                let high = self.registers.holding[usize::from(pwm_frequency_high_address(channel))];
                frequency_in_range(high, value)?;
            }
            None => match address {
                HR_RTC_YEAR => in_range(value, 2000, 2099)?,
                HR_RTC_MONTH => in_range(value, 1, 12)?,
                HR_RTC_DAY => in_range(value, 1, 31)?,
                HR_RTC_HOUR => in_range(value, 0, 23)?,
                HR_RTC_MINUTE | HR_RTC_SECOND => in_range(value, 0, 59)?,
                _ => return Err(ExceptionCode::IllegalDataAddress),
            },
        }
        self.registers.holding[usize::from(address)] = value;
        Ok(())
    }

    fn refresh_inputs(&mut self) -> AccessResult {
        let inputs = self
            .adapters
            .read_inputs()
            .map_err(|e| device_failure("Digital input read failed", e))?;
        self.registers.set_digital_inputs(inputs);
        Ok(())
    }

    fn refresh_adc(&mut self, range: &std::ops::Range<usize>) {
        let Some(adc) = self.adapters.adc() else {
            return;
        };
        if !adc.is_settled() {
            return;
        }
        for channel in 0..ADC_REGISTERS {
            let address = usize::from(HR_ADC_BASE) + channel;
            if range.contains(&address) {
                if let Some(value) = adc.read_channel(channel) {
                    self.registers.holding[address] = to_millivolts(value);
                }
            }
        }
    }
}

impl RegisterAccess for DeviceCallbacks {
    fn read_coils(&mut self, start: u16, values: &mut [bool]) -> AccessResult {
        let range = checked_range(start, values.len(), COIL_MAX_ADDRESS)?;
        if overlaps(
            &range,
            COIL_INPUT_MIRROR_BASE,
            COIL_INPUT_MIRROR_BASE + DIGITAL_INPUTS as u16 - 1,
        ) {
            self.refresh_inputs()?;
        }
        values.copy_from_slice(&self.registers.coils[range]);
        Ok(())
    }

    fn read_discrete_inputs(&mut self, start: u16, values: &mut [bool]) -> AccessResult {
        let range = checked_range(start, values.len(), DISCRETE_INPUT_MAX_ADDRESS)?;
        self.refresh_inputs()?;
        values.copy_from_slice(&self.registers.discrete_inputs[range]);
        Ok(())
    }

    fn read_holding_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult {
        let range = checked_range(start, values.len(), HR_MAX_ADDRESS)?;
        if overlaps(&range, HR_TICK_LOW, HR_TICK_HIGH) {
            let tick = self.adapters.ticks();
            self.registers.set_tick(tick);
        }
        if overlaps(&range, HR_ADC_BASE, HR_ADC_BASE + ADC_REGISTERS as u16 - 1) {
            self.refresh_adc(&range);
        }
        values.copy_from_slice(&self.registers.holding[range]);
        Ok(())
    }

    fn read_input_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult {
        let range = checked_range(start, values.len(), IR_MAX_ADDRESS)?;
        values.copy_from_slice(&self.registers.input[range]);
        Ok(())
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> AccessResult {
        let index = usize::from(address);
        match address {
            a if a < COIL_INPUT_MIRROR_BASE => {
                let channel = usize::from(a - COIL_DIGITAL_OUTPUT_BASE);
                self.adapters
                    .set_output(channel, value)
                    .map_err(|e| device_failure("Digital output write failed", e))?;
                self.registers.coils[index] = value;
                Ok(())
            }
            a if a < COIL_PWM_ENABLE_BASE => Err(ExceptionCode::IllegalDataAddress),
            a if a <= COIL_MAX_ADDRESS => {
                self.registers.coils[index] = value;
                Ok(())
            }
            _ => Err(ExceptionCode::IllegalDataAddress),
        }
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> AccessResult {
        self.store_holding(address, value, None)
    }

    fn write_multiple_registers(&mut self, start: u16, values: &[u16]) -> AccessResult {
        for (offset, &value) in values.iter().enumerate() {
            let address = u16::try_from(offset)
                .ok()
                .and_then(|offset| start.checked_add(offset))
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            // The low half follows the high half; check them as one value.
            let low = match pwm_field(address) {
                Some(PwmField::FrequencyHigh(_)) => values.get(offset + 1).copied(),
                _ => None,
            };
            self.store_holding(address, value, low)?;
        }
        Ok(())
    }
}

/// Device handle shared by the TCP connections and the serial link.
///
/// Each access takes the lock for the whole call. A write also pushes the
/// banks to the hardware before the lock is released, so a register update
/// running for another transport cannot overwrite a written value before it
/// reaches the hardware.
#[derive(Clone)]
pub struct SharedDevice(Arc<Mutex<DeviceCallbacks>>);

impl SharedDevice {
    pub fn new(device: DeviceCallbacks) -> Self {
        Self(Arc::new(Mutex::new(device)))
    }

    /// Lock the device, recovering from a poisoned lock.
    pub fn lock(&self) -> MutexGuard<'_, DeviceCallbacks> {
        self.0.lock().unwrap_or_else(|poisoned| {
            warn!("Device lock was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    pub fn update_registers(&self) {
        self.lock().update_registers();
    }

    /// Run `write` and push the outputs under one lock.
    ///
    /// The push also runs after a failed multiple write, which keeps the
    /// registers written before the failing address.
    fn write_through<F>(&self, write: F) -> AccessResult
    where
        F: FnOnce(&mut DeviceCallbacks) -> AccessResult,
    {
        let mut device = self.lock();
        let result = write(&mut device);
        if let Err(e) = device.apply_outputs() {
            error!("Applying outputs failed: {}", e);
        }
        result
    }
}

impl RegisterAccess for SharedDevice {
    fn read_coils(&mut self, start: u16, values: &mut [bool]) -> AccessResult {
        self.lock().read_coils(start, values)
    }

    fn read_discrete_inputs(&mut self, start: u16, values: &mut [bool]) -> AccessResult {
        self.lock().read_discrete_inputs(start, values)
    }

    fn read_holding_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult {
        self.lock().read_holding_registers(start, values)
    }

    fn read_input_registers(&mut self, start: u16, values: &mut [u16]) -> AccessResult {
        self.lock().read_input_registers(start, values)
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> AccessResult {
        self.write_through(|device| device.write_single_coil(address, value))
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> AccessResult {
        self.write_through(|device| device.write_single_register(address, value))
    }

    fn write_multiple_coils(&mut self, start: u16, values: &[bool]) -> AccessResult {
        self.write_through(|device| device.write_multiple_coils(start, values))
    }

    fn write_multiple_registers(&mut self, start: u16, values: &[u16]) -> AccessResult {
        self.write_through(|device| device.write_multiple_registers(start, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AdcPipeline, SimulatedDma, SETTLING_SAMPLES};
    use crate::peripherals::expander::{ExpanderSettings, OutputExpanders, SimulatedI2cBus};
    use crate::peripherals::hardware::{
        MonotonicTick, SimulatedInputs, SimulatedPwm, SimulatedRtc,
    };
    use std::sync::Arc;

    fn device() -> DeviceCallbacks {
        DeviceCallbacks::new(PeripheralAdapters::simulated(ExpanderSettings::default()))
    }

    #[test]
    fn test_address_limits() {
        let mut dev = device();
        let mut bits = [false; 28];
        assert_eq!(dev.read_coils(0, &mut bits), Ok(()));
        assert_eq!(
            dev.read_coils(1, &mut bits),
            Err(ExceptionCode::IllegalDataAddress)
        );
        let mut regs = [0u16; 29];
        assert_eq!(dev.read_holding_registers(0, &mut regs), Ok(()));
        assert_eq!(
            dev.read_holding_registers(29, &mut regs[..1]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        let mut inputs = [0u16; 9];
        assert_eq!(dev.read_input_registers(0, &mut inputs), Ok(()));
        assert_eq!(&inputs[4..], &[1, 0, 0, 0, 1]);
        let mut di = [false; 9];
        assert_eq!(
            dev.read_discrete_inputs(0, &mut di),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn test_digital_output_coil_drives_expander() {
        let mut dev = device();
        assert_eq!(dev.write_single_coil(9, true), Ok(()));
        assert!(dev.registers().coils[9]);
        assert_eq!(dev.adapters().outputs().shadow(), 0x0200);
    }

    #[test]
    fn test_expander_failure_is_device_failure() {
        let bus = SimulatedI2cBus::with_devices(&[0x20]);
        let adapters = PeripheralAdapters::new(
            Box::new(SimulatedInputs::default()),
            OutputExpanders::new(Box::new(bus), ExpanderSettings::default()),
            Box::new(SimulatedPwm::default()),
            Box::new(SimulatedRtc::default()),
            Box::new(MonotonicTick::default()),
        );
        let mut dev = DeviceCallbacks::new(adapters);
        assert_eq!(
            dev.write_single_coil(3, true),
            Err(ExceptionCode::SlaveDeviceFailure)
        );
        assert!(!dev.registers().coils[3]);
    }

    #[test]
    fn test_input_mirror_is_read_only() {
        let mut dev = device();
        assert_eq!(
            dev.write_single_coil(16, true),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(dev.write_single_coil(25, true), Ok(()));
        assert!(dev.registers().pwm_enabled(1));
        assert_eq!(
            dev.write_single_coil(28, true),
            Err(ExceptionCode::IllegalDataAddress)
        );

        let mut mirror = [false; 8];
        dev.read_coils(16, &mut mirror).unwrap();
        assert_eq!(mirror, [true, false, true, false, false, true, false, true]);
    }

    #[test]
    fn test_register_value_checks() {
        let mut dev = device();
        assert_eq!(dev.write_single_register(0, 10_000), Ok(()));
        assert_eq!(
            dev.write_single_register(3, 10_001),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(dev.write_single_register(4, 0x000F), Ok(()));
        assert_eq!(
            dev.write_single_register(4, 0x0010),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(dev.write_single_register(5, 0xFFFF), Ok(()));

        assert_eq!(dev.write_single_register(HR_RTC_YEAR, 2099), Ok(()));
        assert_eq!(
            dev.write_single_register(HR_RTC_YEAR, 1999),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            dev.write_single_register(HR_RTC_MONTH, 0),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            dev.write_single_register(HR_RTC_HOUR, 24),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(dev.write_single_register(HR_RTC_SECOND, 59), Ok(()));
    }

    #[test]
    fn test_read_only_registers() {
        let mut dev = device();
        for address in [12, 15, HR_TICK_LOW, HR_TICK_HIGH, 24, 26, 27, 28, 29] {
            assert_eq!(
                dev.write_single_register(address, 1),
                Err(ExceptionCode::IllegalDataAddress),
                "address {}",
                address
            );
        }
    }

    #[test]
    fn test_multiple_write_stops_at_first_failure() {
        let mut dev = device();
        assert_eq!(
            dev.write_multiple_registers(9, &[100, 0, 2000, 1]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(dev.registers().pwm_duty(3), 100);
        assert_eq!(dev.registers().pwm_frequency(3), 2000);
    }

    #[test]
    fn test_tick_pair_refreshed_on_read() {
        let mut dev = device();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut pair = [0u16; 2];
        dev.read_holding_registers(HR_TICK_LOW, &mut pair).unwrap();
        let tick = (u32::from(pair[1]) << 16) | u32::from(pair[0]);
        assert!(tick >= 20);
        assert_eq!(dev.registers().tick(), tick);
    }

    #[test]
    fn test_adc_holding_millivolts_once_settled() {
        let pipeline = Arc::new(AdcPipeline::new(Box::new(SimulatedDma::new())));
        pipeline.start().unwrap();
        let adapters = PeripheralAdapters::simulated(ExpanderSettings::default())
            .with_adc(Arc::clone(&pipeline));
        let mut dev = DeviceCallbacks::new(adapters);

        let mut adc = [0u16; 4];
        dev.read_holding_registers(HR_ADC_BASE, &mut adc).unwrap();
        assert_eq!(adc, [0; 4]);

        for _ in 0..SETTLING_SAMPLES.max(20_000) {
            pipeline.on_sequence_complete(&[4095, 2048, 0, 4095, 0, 0]);
        }
        dev.update_registers();
        assert!(dev.registers().input[0] >= 4090);

        dev.read_holding_registers(HR_ADC_BASE, &mut adc).unwrap();
        assert!((999..=1000).contains(&adc[0]), "adc {:?}", adc);
        assert!((499..=501).contains(&adc[1]), "adc {:?}", adc);
        assert_eq!(adc[2], 0);
        assert_eq!(dev.registers().holding[usize::from(HR_ADC_BASE)], adc[0]);
    }

    #[test]
    fn test_shared_device_forwards_access() {
        let mut shared = SharedDevice::new(device());
        let mut other = shared.clone();
        shared.write_single_register(pwm_duty_address(1), 2500).unwrap();
        let mut values = [0u16; 1];
        other
            .read_holding_registers(pwm_duty_address(1), &mut values)
            .unwrap();
        assert_eq!(values[0], 2500);
        assert_eq!(shared.lock().adapters().pwm().duty_cycle(1), 2500);
    }

    #[test]
    fn test_register_update_after_write_keeps_written_values() {
        let mut shared = SharedDevice::new(device());
        let poller = shared.clone();

        // PWM1 enable coil and RTC minute; both are refreshed from the
        // hardware by every register update.
        shared
            .write_single_coil(COIL_PWM_ENABLE_BASE + 1, true)
            .unwrap();
        shared.write_single_register(HR_RTC_MINUTE, 30).unwrap();
        poller.update_registers();

        let mut coil = [false; 1];
        shared
            .read_coils(COIL_PWM_ENABLE_BASE + 1, &mut coil)
            .unwrap();
        assert!(coil[0]);
        let device = shared.lock();
        assert!(device.adapters().pwm().is_enabled(1));
        assert_eq!(device.registers().holding[usize::from(HR_RTC_MINUTE)], 30);
    }

    #[test]
    fn test_frequency_out_of_range_is_rejected() {
        let mut dev = device();
        let high = pwm_frequency_high_address(0);
        let low = pwm_frequency_low_address(0);

        // 0 Hz and 0xFFFFF Hz through FC16
        assert_eq!(
            dev.write_multiple_registers(high, &[0, 0]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            dev.write_multiple_registers(high, &[0x000F, 0xFFFF]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(dev.registers().pwm_frequency(0), 1000);

        // 0 Hz and 0xF03E8 (984040 Hz) then 0xFFFFF through FC06
        assert_eq!(
            dev.write_single_register(low, 0),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(dev.write_single_register(high, 0x000F), Ok(()));
        assert_eq!(
            dev.write_single_register(low, 0xFFFF),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(dev.registers().pwm_frequency(0), 0x000F_03E8);
    }

    #[test]
    fn test_frequency_pair_checked_as_one_value() {
        let mut dev = device();
        let high = pwm_frequency_high_address(2);
        dev.write_multiple_registers(high, &[0x0000, 0xFFFF]).unwrap();
        // 0xF0000 is valid although 0xFFFFF would be on the way
        assert_eq!(dev.write_multiple_registers(high, &[0x000F, 0x0000]), Ok(()));
        assert_eq!(dev.registers().pwm_frequency(2), 0x000F_0000);
        assert_eq!(dev.write_multiple_registers(high, &[0x000F, 0x4240]), Ok(()));
        assert_eq!(dev.registers().pwm_frequency(2), PWM_FREQUENCY_MAX);
    }

    #[test]
    fn test_millivolt_conversion() {
        assert_eq!(to_millivolts(0.5), 500);
        assert_eq!(to_millivolts(1.2), 1000);
        assert_eq!(to_millivolts(-0.1), 0);
    }
}
