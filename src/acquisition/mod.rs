// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! ADC acquisition pipeline
//!
//! A hardware timer triggers one conversion sequence of [`NUM_CHANNELS`]
//! channels; circular DMA moves the results into memory and raises the
//! sequence-complete interrupt, which lands in
//! [`AdcPipeline::on_sequence_complete`]. That entry point filters every
//! channel and publishes the results for task-context readers.
//!
//! ## Publication
//!
//! | Reader | Guarantee |
//! |--------|-----------|
//! | [`AdcPipeline::read_channel`] | One atomic 32-bit load, never blocks the producer |
//! | [`AdcPipeline::read_all`] | All channels from the same sequence |
//!
//! Filtered values are `f32` normalised to the 12-bit full scale (0.0..=1.0)
//! and stored as their bit pattern in an `AtomicU32`.
//!
//! ## Error recovery
//!
//! [`AdcPipeline::on_error`] only raises flags. A task later calls
//! [`AdcPipeline::check_and_restart`], which stops the DMA, rebuilds the
//! linked list and restarts it.

pub mod sampler;
pub mod simulated;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::preprocessing::AdcFilter;
pub use crate::preprocessing::NUM_CHANNELS;
pub use sampler::run_sampler;
pub use simulated::{SimulatedDma, SimulatedSignal};

/// Sequence-complete events after which the filter output is valid.
pub const SETTLING_SAMPLES: u32 = 1024;

/// Full-scale code of the 12-bit converter.
pub const ADC_FULL_SCALE: u16 = 4095;

/// Failures of the ADC/DMA hardware layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("DMA linked list configuration failed: {0}")]
    LinkedList(String),
    #[error("DMA transfer could not be started: {0}")]
    Start(String),
}

/// Control surface of the ADC + circular DMA hardware.
pub trait AdcDmaBackend: Send {
    /// Start the timer-triggered conversions and the circular transfer.
    fn start(&mut self) -> Result<(), AcquisitionError>;

    /// Stop conversions and the transfer.
    fn stop(&mut self);

    /// Rebuild the DMA linked list after an error.
    fn reinit_linked_list(&mut self) -> Result<(), AcquisitionError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Continuously running acquisition and filtering context.
pub struct AdcPipeline {
    // Held by the sequence-complete path while it filters and publishes, and
    // by `read_all` while it copies.
    filter: Mutex<AdcFilter>,
    backend: Mutex<Box<dyn AdcDmaBackend>>,
    filtered: [AtomicU32; NUM_CHANNELS],
    raw: [AtomicU32; NUM_CHANNELS],
    sample_count: AtomicU32,
    conversion_complete: AtomicBool,
    running: AtomicBool,
    error: AtomicBool,
    error_count: AtomicU32,
    restart_count: AtomicU32,
}

impl AdcPipeline {
    pub fn new(backend: Box<dyn AdcDmaBackend>) -> Self {
        Self {
            filter: Mutex::new(AdcFilter::new()),
            backend: Mutex::new(backend),
            filtered: std::array::from_fn(|_| AtomicU32::new(0.0f32.to_bits())),
            raw: std::array::from_fn(|_| AtomicU32::new(0)),
            sample_count: AtomicU32::new(0),
            conversion_complete: AtomicBool::new(false),
            running: AtomicBool::new(false),
            error: AtomicBool::new(false),
            error_count: AtomicU32::new(0),
            restart_count: AtomicU32::new(0),
        }
    }

    /// Initialize the filters, clear the counters and start the hardware.
    ///
    /// ### Errors
    ///
    /// Returns the backend error if the transfer cannot be started.
    pub fn start(&self) -> Result<(), AcquisitionError> {
        {
            let mut filter = lock(&self.filter);
            filter.init();
            for value in &self.filtered {
                value.store(0.0f32.to_bits(), Ordering::Relaxed);
            }
            self.sample_count.store(0, Ordering::Release);
        }
        self.error.store(false, Ordering::Release);
        lock(&self.backend).start()?;
        self.running.store(true, Ordering::Release);
        info!("ADC acquisition started ({} channels)", NUM_CHANNELS);
        Ok(())
    }

    pub fn stop(&self) {
        lock(&self.backend).stop();
        self.running.store(false, Ordering::Release);
        info!("ADC acquisition stopped");
    }

    /// Sequence-complete interrupt entry point.
    ///
    /// `samples` holds one 12-bit conversion per channel.
    pub fn on_sequence_complete(&self, samples: &[u16; NUM_CHANNELS]) {
        self.conversion_complete.store(true, Ordering::Release);
        {
            let mut filter = lock(&self.filter);
            for (channel, &sample) in samples.iter().enumerate() {
                let code = sample.min(ADC_FULL_SCALE);
                self.raw[channel].store(u32::from(code), Ordering::Relaxed);
                if filter.is_initialized(channel) {
                    let x = f32::from(code) / f32::from(ADC_FULL_SCALE);
                    let y = filter.process_sample(channel, x);
                    self.filtered[channel].store(y.to_bits(), Ordering::Release);
                }
            }
        }
        // Saturates instead of wrapping so `is_settled` never falls back.
        let _ = self
            .sample_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_add(1))
            });
    }

    /// ADC or DMA error interrupt entry point.
    pub fn on_error(&self) {
        self.error.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Restart the transfer if an error was flagged.
    ///
    /// ### Returns
    ///
    /// `true` if a restart was performed.
    ///
    /// ### Errors
    ///
    /// Returns the backend error when the linked list cannot be rebuilt or
    /// the transfer cannot be restarted; the error flag stays set.
    pub fn check_and_restart(&self) -> Result<bool, AcquisitionError> {
        if !self.error.load(Ordering::Acquire) {
            return Ok(false);
        }
        warn!("ADC error detected, restarting acquisition");
        let mut backend = lock(&self.backend);
        backend.stop();
        backend.reinit_linked_list()?;
        backend.start()?;
        self.error.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        let restarts = self.restart_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!("ADC acquisition restarted ({} restarts)", restarts);
        Ok(true)
    }

    /// Latest filtered value of `channel`, `None` for an invalid channel.
    pub fn read_channel(&self, channel: usize) -> Option<f32> {
        self.filtered
            .get(channel)
            .map(|value| f32::from_bits(value.load(Ordering::Acquire)))
    }

    /// Latest filtered values of all channels, taken from the same sequence.
    pub fn read_all(&self) -> [f32; NUM_CHANNELS] {
        let _guard = lock(&self.filter);
        std::array::from_fn(|channel| {
            f32::from_bits(self.filtered[channel].load(Ordering::Acquire))
        })
    }

    /// Latest unfiltered 12-bit codes.
    pub fn raw_snapshot(&self) -> [u16; NUM_CHANNELS] {
        let _guard = lock(&self.filter);
        // Stored values never exceed ADC_FULL_SCALE.
        std::array::from_fn(|channel| self.raw[channel].load(Ordering::Relaxed) as u16)
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count.load(Ordering::Acquire)
    }

    pub fn is_settled(&self) -> bool {
        self.sample_count() >= SETTLING_SAMPLES
    }

    /// Return and clear the "conversion complete since last call" flag.
    pub fn take_conversion_complete(&self) -> bool {
        self.conversion_complete.swap(false, Ordering::AcqRel)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Relaxed)
    }

    /// One-line status summary for the monitor task.
    pub fn log_status(&self) {
        debug!(
            "ADC: running={} settled={} samples={} errors={} restarts={}",
            self.is_running(),
            self.is_settled(),
            self.sample_count(),
            self.error_count(),
            self.restart_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn pipeline() -> (AdcPipeline, SimulatedDma) {
        let dma = SimulatedDma::new();
        let pipeline = AdcPipeline::new(Box::new(dma.clone()));
        (pipeline, dma)
    }

    #[test]
    fn test_settles_after_threshold() {
        let (pipeline, dma) = pipeline();
        pipeline.start().unwrap();
        assert!(dma.is_active());
        let samples = [2048u16; NUM_CHANNELS];
        for _ in 0..SETTLING_SAMPLES - 1 {
            pipeline.on_sequence_complete(&samples);
        }
        assert!(!pipeline.is_settled());
        pipeline.on_sequence_complete(&samples);
        assert!(pipeline.is_settled());
        assert_eq!(pipeline.sample_count(), SETTLING_SAMPLES);
    }

    #[test]
    fn test_filtered_values_converge() {
        let (pipeline, _dma) = pipeline();
        pipeline.start().unwrap();
        let samples = [0, 819, 2048, 3276, 4095, 5000];
        for _ in 0..20_000 {
            pipeline.on_sequence_complete(&samples);
        }
        let values = pipeline.read_all();
        assert_relative_eq!(values[2], 2048.0 / 4095.0, epsilon = 1e-3);
        assert_relative_eq!(values[4], 1.0, epsilon = 1e-3);
        // Codes above full scale are clamped.
        assert_relative_eq!(values[5], 1.0, epsilon = 1e-3);
        assert_eq!(pipeline.read_channel(2), Some(values[2]));
        assert_eq!(pipeline.read_channel(NUM_CHANNELS), None);
        assert_eq!(pipeline.raw_snapshot()[5], ADC_FULL_SCALE);
    }

    #[test]
    fn test_conversion_complete_flag() {
        let (pipeline, _dma) = pipeline();
        assert!(!pipeline.take_conversion_complete());
        pipeline.on_sequence_complete(&[0; NUM_CHANNELS]);
        assert!(pipeline.take_conversion_complete());
        assert!(!pipeline.take_conversion_complete());
    }

    #[test]
    fn test_unstarted_pipeline_does_not_filter() {
        let (pipeline, _dma) = pipeline();
        pipeline.on_sequence_complete(&[4095; NUM_CHANNELS]);
        assert_eq!(pipeline.read_channel(0), Some(0.0));
        assert_eq!(pipeline.sample_count(), 1);
    }

    #[test]
    fn test_error_restart() {
        let (pipeline, dma) = pipeline();
        pipeline.start().unwrap();
        assert_eq!(pipeline.check_and_restart(), Ok(false));

        pipeline.on_error();
        assert!(!pipeline.is_running());
        assert!(pipeline.has_error());
        assert_eq!(pipeline.check_and_restart(), Ok(true));
        assert!(pipeline.is_running());
        assert!(!pipeline.has_error());
        assert_eq!(pipeline.restart_count(), 1);
        assert_eq!(pipeline.error_count(), 1);
        assert_eq!(dma.reinit_count(), 1);
        assert_eq!(pipeline.check_and_restart(), Ok(false));
    }

    #[test]
    fn test_failed_restart_keeps_error() {
        let (pipeline, dma) = pipeline();
        pipeline.start().unwrap();
        pipeline.on_error();
        dma.fail_next_reinit();
        assert!(pipeline.check_and_restart().is_err());
        assert!(pipeline.has_error());
        assert_eq!(pipeline.check_and_restart(), Ok(true));
    }

    #[test]
    fn test_concurrent_readers_see_consistent_snapshots() {
        let (pipeline, _dma) = pipeline();
        pipeline.start().unwrap();
        let pipeline = Arc::new(pipeline);
        let producer = {
            let pipeline = Arc::clone(&pipeline);
            std::thread::spawn(move || {
                for i in 0..5_000u16 {
                    pipeline.on_sequence_complete(&[i % 4096; NUM_CHANNELS]);
                }
            })
        };
        for _ in 0..1_000 {
            let values = pipeline.read_all();
            assert!(values.windows(2).all(|pair| pair[0] == pair[1]));
        }
        producer.join().unwrap();
        assert_eq!(pipeline.sample_count(), 5_000);
    }
}
