// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Timer-driven sample producer for the simulated front-end.
//!
//! Conversions arrive in batches: every `period` the task generates
//! `sample_rate × period` sequences and hands each one to the
//! sequence-complete entry point, just as the DMA interrupt would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info};
use tokio::time::{self, MissedTickBehavior};

use super::{AdcPipeline, SimulatedSignal};

/// Number of sequences produced per batch, at least one.
pub fn batch_size(sample_rate: u32, period: Duration) -> usize {
    let samples = u128::from(sample_rate) * period.as_micros() / 1_000_000;
    usize::try_from(samples).unwrap_or(usize::MAX).max(1)
}

/// Feed `pipeline` from `signal` until `running` is cleared.
///
/// Batches are skipped while the pipeline is stopped or waiting for a
/// restart.
pub async fn run_sampler(
    pipeline: Arc<AdcPipeline>,
    mut signal: SimulatedSignal,
    sample_rate: u32,
    period: Duration,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let batch = batch_size(sample_rate, period);
    info!(
        "ADC sampler running: {} Hz, {} sequences every {:?}",
        sample_rate, batch, period
    );

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !pipeline.is_running() {
            continue;
        }
        for _ in 0..batch {
            let sequence = signal.next_sequence();
            pipeline.on_sequence_complete(&sequence);
        }
    }

    debug!("ADC sampler stopped after {} sequences", pipeline.sample_count());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{SimulatedDma, NUM_CHANNELS, SETTLING_SAMPLES};

    #[test]
    fn test_batch_size() {
        assert_eq!(batch_size(10_000, Duration::from_millis(10)), 100);
        assert_eq!(batch_size(10_000, Duration::from_micros(50)), 1);
        assert_eq!(batch_size(0, Duration::from_millis(10)), 1);
    }

    #[tokio::test]
    async fn test_sampler_settles_pipeline() {
        let pipeline = Arc::new(AdcPipeline::new(Box::new(SimulatedDma::new())));
        pipeline.start().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let signal = SimulatedSignal::new([0.5; NUM_CHANNELS], 0.0, 0.0, 10_000, 3);

        let task = tokio::spawn(run_sampler(
            Arc::clone(&pipeline),
            signal,
            10_000,
            Duration::from_millis(10),
            Arc::clone(&running),
        ));

        for _ in 0..200 {
            if pipeline.is_settled() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        running.store(false, Ordering::SeqCst);
        task.await.unwrap().unwrap();

        assert!(pipeline.sample_count() >= SETTLING_SAMPLES);
    }

    #[tokio::test]
    async fn test_stopped_pipeline_receives_nothing() {
        let pipeline = Arc::new(AdcPipeline::new(Box::new(SimulatedDma::new())));
        let running = Arc::new(AtomicBool::new(true));
        let signal = SimulatedSignal::new([0.5; NUM_CHANNELS], 0.0, 0.0, 10_000, 3);
        let task = tokio::spawn(run_sampler(
            Arc::clone(&pipeline),
            signal,
            10_000,
            Duration::from_millis(5),
            Arc::clone(&running),
        ));
        time::sleep(Duration::from_millis(30)).await;
        running.store(false, Ordering::SeqCst);
        task.await.unwrap().unwrap();
        assert_eq!(pipeline.sample_count(), 0);
    }
}
