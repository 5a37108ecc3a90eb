// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! RTU and ASCII scenarios through the framers, the dispatcher and the device

use std::time::{Duration, Instant};

use rust_io_controller::modbus::crc::{crc16, crc16_verify};
use rust_io_controller::modbus::{ContextConfig, ModbusContext, Protocol, SerialSession};
use rust_io_controller::peripherals::{
    DeviceCallbacks, ExpanderSettings, PeripheralAdapters, SharedDevice,
};

const INTERCHAR: Duration = Duration::from_micros(750);
const INTERFRAME: Duration = Duration::from_micros(1750);

fn device() -> SharedDevice {
    SharedDevice::new(DeviceCallbacks::new(PeripheralAdapters::simulated(
        ExpanderSettings::default(),
    )))
}

fn rtu_session(device: SharedDevice) -> SerialSession<SharedDevice> {
    let context = ModbusContext::new(ContextConfig::default_for(Protocol::Rtu), device).unwrap();
    SerialSession::rtu_with_timing(context, INTERCHAR, INTERFRAME)
}

fn ascii_session(device: SharedDevice) -> SerialSession<SharedDevice> {
    let context =
        ModbusContext::new(ContextConfig::default_for(Protocol::Ascii), device).unwrap();
    SerialSession::ascii(context, Duration::from_secs(1))
}

fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&crc16(body).to_le_bytes());
    frame
}

/// Feed a whole RTU frame at `at`, then let the line go quiet.
fn rtu_exchange(
    session: &mut SerialSession<SharedDevice>,
    frame: &[u8],
    at: Instant,
) -> Option<Vec<u8>> {
    for &byte in frame {
        assert!(session.feed(byte, at).is_none());
    }
    session.poll(at + INTERFRAME * 2).map(<[u8]>::to_vec)
}

fn ascii_exchange(session: &mut SerialSession<SharedDevice>, frame: &[u8]) -> Option<Vec<u8>> {
    let now = Instant::now();
    let mut response = None;
    for &c in frame {
        response = session.feed(c, now).map(<[u8]>::to_vec);
    }
    response
}

#[test]
fn test_rtu_read_holding_registers() {
    let mut session = rtu_session(device());
    let request = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x03]);
    let response = rtu_exchange(&mut session, &request, Instant::now()).unwrap();

    assert!(crc16_verify(&response));
    // PWM0 duty 5000, frequency 1000 Hz
    assert_eq!(
        &response[..response.len() - 2],
        &[0x01, 0x03, 0x06, 0x13, 0x88, 0x00, 0x00, 0x03, 0xE8]
    );
}

#[test]
fn test_rtu_broadcast_write_has_no_response() {
    let device = device();
    let mut session = rtu_session(device.clone());
    let request = [0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x49, 0xDB];
    assert!(crc16_verify(&request));

    assert!(rtu_exchange(&mut session, &request, Instant::now()).is_none());
    assert_eq!(device.lock().registers().pwm_duty(0), 1);
    let stats = session.context().statistics();
    assert_eq!(stats.requests_processed, 1);
    assert_eq!(stats.responses_sent, 0);
}

#[test]
fn test_rtu_other_unit_is_ignored() {
    let mut session = rtu_session(device());
    let request = with_crc(&[0x02, 0x03, 0x00, 0x00, 0x00, 0x01]);
    assert!(rtu_exchange(&mut session, &request, Instant::now()).is_none());
    assert_eq!(session.context().statistics().requests_processed, 0);
}

#[test]
fn test_rtu_crc_error_is_dropped_and_counted() {
    let mut session = rtu_session(device());
    let mut request = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
    let last = request.len() - 1;
    request[last] ^= 0xFF;

    let t0 = Instant::now();
    assert!(rtu_exchange(&mut session, &request, t0).is_none());
    assert_eq!(session.context().statistics().errors_count, 1);

    // The next frame is served normally
    let request = with_crc(&[0x01, 0x03, 0x00, 0x18, 0x00, 0x01]);
    let response = rtu_exchange(&mut session, &request, t0 + INTERFRAME * 4).unwrap();
    assert_eq!(&response[..5], &[0x01, 0x03, 0x02, 0x00, 0x01]);
}

#[test]
fn test_rtu_exception_response() {
    let mut session = rtu_session(device());
    // Tick registers are read-only
    let request = with_crc(&[0x01, 0x06, 0x00, 0x10, 0x00, 0x01]);
    let response = rtu_exchange(&mut session, &request, Instant::now()).unwrap();
    assert_eq!(response.len(), 5);
    assert_eq!(&response[..3], &[0x01, 0x86, 0x02]);
    assert!(crc16_verify(&response));
}

#[test]
fn test_ascii_write_coil_echo() {
    let device = device();
    let mut session = ascii_session(device.clone());

    // Lower-case hex is accepted; the response is upper-case
    let response = ascii_exchange(&mut session, b":01050009ff00f2\r\n").unwrap();
    assert_eq!(response, b":01050009FF00F2\r\n".to_vec());
    assert_eq!(device.lock().adapters().outputs().shadow(), 1 << 9);
}

#[test]
fn test_ascii_bad_lrc_is_dropped() {
    let mut session = ascii_session(device());
    assert!(ascii_exchange(&mut session, b":010300000001FA\r\n").is_none());
    assert_eq!(session.context().statistics().errors_count, 1);

    let response = ascii_exchange(&mut session, b":010300000001FB\r\n").unwrap();
    assert_eq!(response, b":010302138861\r\n".to_vec());
}

#[test]
fn test_ascii_stale_frame_expires() {
    let mut session = ascii_session(device());
    let t0 = Instant::now();
    for &c in b":0103" {
        assert!(session.feed(c, t0).is_none());
    }
    assert!(session.poll(t0 + Duration::from_millis(500)).is_none());
    assert_eq!(session.context().statistics().errors_count, 0);
    assert!(session.poll(t0 + Duration::from_secs(2)).is_none());
    assert_eq!(session.context().statistics().errors_count, 1);
}
