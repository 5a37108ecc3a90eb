// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus RTU/ASCII slave on a serial line
//!
//! The link drives a [`SerialSession`] from any byte stream. On a host the
//! stream is a serial port opened with the configured baud rate, data bits,
//! parity and stop bits, split into a read half and a write half.
//!
//! The receive loop wakes up every `poll_interval` even when the line is idle:
//! RTU frames are completed by silence, and stale ASCII frames expire.
//!
//! All bytes of one read carry the same timestamp, so the silence between
//! two RTU requests buffered by the driver is lost. A request whose length
//! (from its function code) and CRC are complete is closed immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time;
use tokio_serial::{SerialPortBuilder, SerialStream};

use crate::modbus::{SerialSession, Statistics};
use crate::peripherals::SharedDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialLinkSettings {
    /// Receive wake-up period, at most the RTU inter-frame delay.
    pub poll_interval: Duration,
    /// Period of the hardware → register update.
    pub update_interval: Duration,
}

impl Default for SerialLinkSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            update_interval: Duration::from_millis(100),
        }
    }
}

/// Open the serial port described by `builder` and split it.
///
/// `device` only names the port in errors.
///
/// ### Errors
///
/// Returns an error if the port cannot be opened or configured.
pub fn open_port(
    builder: &SerialPortBuilder,
    device: &str,
) -> Result<(ReadHalf<SerialStream>, WriteHalf<SerialStream>)> {
    let port = SerialStream::open(builder)
        .with_context(|| format!("Failed to open serial port {}", device))?;
    Ok(io::split(port))
}

pub struct SerialLink {
    session: SerialSession<SharedDevice>,
    settings: SerialLinkSettings,
    statistics: Arc<Mutex<Statistics>>,
}

impl SerialLink {
    pub fn new(session: SerialSession<SharedDevice>, settings: SerialLinkSettings) -> Self {
        let statistics = Arc::new(Mutex::new(session.context().statistics()));
        Self {
            session,
            settings,
            statistics,
        }
    }

    /// Snapshot of the session counters, refreshed after every frame.
    pub fn statistics(&self) -> Arc<Mutex<Statistics>> {
        Arc::clone(&self.statistics)
    }

    /// Serve requests until `running` is cleared or the stream ends.
    ///
    /// ### Errors
    ///
    /// Returns an error when reading from or writing to the line fails.
    pub async fn run<R, W>(mut self, mut reader: R, mut writer: W, running: Arc<AtomicBool>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let unit_id = self.session.context().unit_id();
        info!(
            "Serial Modbus link started (unit {}, {:?} config)",
            unit_id,
            self.session.context().config().protocol
        );

        let mut rx = [0u8; 256];
        let mut last_update: Option<Instant> = None;
        let poll = self.settings.poll_interval.max(Duration::from_millis(1));

        while running.load(Ordering::SeqCst) {
            if last_update.map_or(true, |at| at.elapsed() >= self.settings.update_interval) {
                self.session.context().access().update_registers();
                last_update = Some(Instant::now());
            }

            let received = match time::timeout(poll, reader.read(&mut rx)).await {
                Err(_) => 0,
                Ok(Ok(0)) => {
                    info!("Serial line closed");
                    break;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e).context("Serial receive failed"),
            };

            let before = self.session.context().statistics();
            let now = Instant::now();
            for &byte in &rx[..received] {
                if let Some(response) = self.session.feed(byte, now) {
                    writer.write_all(response).await.context("Serial send failed")?;
                }
                if let Some(end) = self.session.request_end() {
                    if let Some(response) = self.session.poll(end) {
                        writer.write_all(response).await.context("Serial send failed")?;
                    }
                }
            }
            if let Some(response) = self.session.poll(Instant::now()) {
                writer.write_all(response).await.context("Serial send failed")?;
            }
            writer.flush().await.context("Serial flush failed")?;

            let after = self.session.context().statistics();
            if after != before {
                self.publish_statistics(after);
            }
        }

        debug!("Serial Modbus link stopped");
        Ok(())
    }

    fn publish_statistics(&self, snapshot: Statistics) {
        *self
            .statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}
