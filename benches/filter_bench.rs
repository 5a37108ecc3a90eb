// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Hot paths of the controller: the ADC filter cascade and the Modbus dispatcher

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rust_io_controller::modbus::crc::crc16;
use rust_io_controller::modbus::pdu::encode_read_holding_registers;
use rust_io_controller::modbus::{rtu, Adu, ContextConfig, ModbusContext, Protocol};
use rust_io_controller::peripherals::{
    DeviceCallbacks, ExpanderSettings, PeripheralAdapters, SharedDevice,
};
use rust_io_controller::preprocessing::{AdcFilter, NUM_CHANNELS};

fn bench_adc_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("adc_filter");

    // One DMA sequence: a sample on every channel
    let mut filter = AdcFilter::new();
    filter.init();
    let mut phase = 0.0f32;
    group.bench_function("sequence", |b| {
        b.iter(|| {
            phase += 0.0314;
            let x = 0.5 + 0.05 * phase.sin();
            for channel in 0..NUM_CHANNELS {
                black_box(filter.process_sample(channel, black_box(x)));
            }
        })
    });

    let input: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.0314).sin()).collect();
    let mut output = vec![0.0f32; input.len()];
    group.bench_function("block_1024", |b| {
        b.iter(|| filter.process_block(0, black_box(&input), &mut output))
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let device = SharedDevice::new(DeviceCallbacks::new(PeripheralAdapters::simulated(
        ExpanderSettings::default(),
    )));
    let mut context = ModbusContext::new(ContextConfig::default_for(Protocol::Rtu), device)
        .expect("default RTU configuration is valid");

    let pdu = encode_read_holding_registers(0, 29).expect("valid request");
    let request = Adu::new(1, pdu);
    c.bench_function("dispatch_fc03_29_registers", |b| {
        b.iter(|| black_box(context.process_adu(black_box(&request))))
    });

    let mut frame = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x1D];
    frame.extend_from_slice(&crc16(&frame).to_le_bytes());
    c.bench_function("rtu_parse_and_dispatch", |b| {
        b.iter(|| {
            let adu = rtu::parse_frame(black_box(&frame)).expect("valid frame");
            black_box(context.process_adu(&adu))
        })
    });
}

criterion_group!(benches, bench_adc_filter, bench_dispatch);
criterion_main!(benches);
