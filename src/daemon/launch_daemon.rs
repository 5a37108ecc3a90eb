// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time;

use super::pools;
use crate::acquisition::{run_sampler, AdcPipeline, SimulatedDma};
use crate::config::Config;
use crate::modbus::{ModbusContext, SerialSession, Statistics};
use crate::peripherals::{DeviceCallbacks, PeripheralAdapters, SharedDevice};
use crate::server::{
    lock_context, open_port, shared_context, ModbusTcpServer, SerialLink, SerialLinkSettings,
    SharedContext,
};

/// Represents a daemon task that can be started and managed
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    adc: Option<Arc<AdcPipeline>>,
    device: Option<SharedDevice>,
    context: Option<SharedContext>,
    connections: Option<Arc<AtomicUsize>>,
    serial_statistics: Option<Arc<Mutex<Statistics>>>,
    modbus_addr: Option<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            adc: None,
            device: None,
            context: None,
            connections: None,
            serial_statistics: None,
            modbus_addr: None,
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// The ADC pipeline is started first so that the peripheral adapters can
    /// read it, then the Modbus transports share one device.
    ///
    /// ### Errors
    ///
    /// Fails if the ADC cannot start, the TCP server cannot bind, or the
    /// serial device cannot be opened.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        if !pools::fits_thread_pool(config.modbus.max_connections) {
            warn!(
                "{} Modbus connections exceed the {}-thread budget of the controller",
                config.modbus.max_connections,
                pools::MAX_THREADS
            );
        }

        if config.acquisition.enabled {
            self.start_data_acquisition(config)?;
        }

        let mut adapters = PeripheralAdapters::simulated(config.peripherals.expander_settings());
        if let Some(adc) = &self.adc {
            adapters = adapters.with_adc(Arc::clone(adc));
        }
        let device = SharedDevice::new(DeviceCallbacks::new(adapters));
        self.device = Some(device.clone());

        if config.modbus.enabled {
            self.start_modbus_server(config, device.clone()).await?;
        }

        if config.serial.enabled {
            self.start_serial_link(config, device).await?;
        }

        self.start_monitor(config)?;
        self.start_statistics(config)?;

        Ok(())
    }

    /// Start the ADC pipeline and the sampler feeding it
    fn start_data_acquisition(&mut self, config: &Config) -> Result<()> {
        info!(
            "Starting data acquisition at {} Hz",
            config.acquisition.sample_rate_hz
        );

        let pipeline = Arc::new(AdcPipeline::new(Box::new(SimulatedDma::new())));
        pipeline.start().context("Failed to start ADC acquisition")?;
        self.adc = Some(Arc::clone(&pipeline));

        let signal = config.acquisition.signal();
        let sample_rate = config.acquisition.sample_rate_hz;
        let period = Duration::from_millis(config.acquisition.batch_period_ms);
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let result = run_sampler(Arc::clone(&pipeline), signal, sample_rate, period, running).await;
            pipeline.stop();
            result
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Bind the Modbus/TCP server and spawn its accept loop
    ///
    /// Binding happens before this returns so that address errors surface
    /// from [`launch`](Self::launch).
    async fn start_modbus_server(&mut self, config: &Config, device: SharedDevice) -> Result<()> {
        info!(
            "Starting modbus server on {}:{}",
            config.modbus.address, config.modbus.port
        );
        let address = if config.modbus.address == "localhost" {
            "127.0.0.1"
        } else {
            config.modbus.address.as_str()
        };
        let socket_addr: SocketAddr = format!("{}:{}", address, config.modbus.port)
            .parse()
            .or_else(|_| format!("[{}]:{}", address, config.modbus.port).parse())
            .with_context(|| {
                format!(
                    "Invalid Modbus socket address {}:{}",
                    config.modbus.address, config.modbus.port
                )
            })?;

        let context = shared_context(config.modbus.unit_id, device)?;
        let server =
            ModbusTcpServer::bind(socket_addr, Arc::clone(&context), config.modbus.server_settings())
                .await?;
        self.modbus_addr = Some(server.local_addr()?);
        self.connections = Some(server.active_connections());
        self.context = Some(context);

        let running = self.running.clone();
        let task = tokio::spawn(server.run(running));

        self.tasks.push(task);
        Ok(())
    }

    /// Open the serial port and spawn the RTU/ASCII slave on it
    async fn start_serial_link(&mut self, config: &Config, device: SharedDevice) -> Result<()> {
        let serial = &config.serial;
        info!(
            "Starting {:?} slave on {} at {} baud",
            serial.protocol, serial.device, serial.baud_rate
        );

        let context = ModbusContext::new(serial.context_config(config.modbus.unit_id), device)
            .context("Invalid serial Modbus configuration")?;
        let session =
            SerialSession::for_context(context, serial.baud_rate, serial.ascii_frame_timeout())
                .context("Serial protocol must be rtu or ascii")?;
        let settings = SerialLinkSettings {
            poll_interval: serial.poll_interval(),
            update_interval: config.modbus.server_settings().update_interval,
        };
        let link = SerialLink::new(session, settings);
        self.serial_statistics = Some(link.statistics());

        let builder = serial.port_builder()?;
        let (reader, writer) = open_port(&builder, &serial.device)?;
        let running = self.running.clone();
        let task = tokio::spawn(link.run(reader, writer, running));

        self.tasks.push(task);
        Ok(())
    }

    /// Start a monitor task that reports ADC and connection status periodically
    fn start_monitor(&mut self, config: &Config) -> Result<()> {
        debug!("Starting status monitor");

        let running = self.running.clone();
        let adc = self.adc.clone();
        let connections = self.connections.clone();
        let interval = Duration::from_millis(config.monitor.interval_ms);
        let task = tokio::spawn(async move {
            while sleep_while_running(&running, interval).await {
                if let Some(adc) = &adc {
                    info!(
                        "ADC: running={} settled={} samples={} errors={} restarts={}",
                        adc.is_running(),
                        adc.is_settled(),
                        adc.sample_count(),
                        adc.error_count(),
                        adc.restart_count()
                    );
                    if adc.has_error() {
                        warn!("ADC reported an error, restart pending");
                    }
                }
                if let Some(connections) = &connections {
                    info!(
                        "Modbus/TCP: {} active connection(s)",
                        connections.load(Ordering::SeqCst)
                    );
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start the lowest-priority task that logs the dispatcher counters
    fn start_statistics(&mut self, config: &Config) -> Result<()> {
        debug!("Starting statistics logger");

        let running = self.running.clone();
        let context = self.context.clone();
        let serial = self.serial_statistics.clone();
        let interval = Duration::from_millis(config.monitor.statistics_interval_ms);
        let task = tokio::spawn(async move {
            while sleep_while_running(&running, interval).await {
                if let Some(context) = &context {
                    log_statistics("Modbus/TCP", lock_context(context).statistics());
                }
                if let Some(serial) = &serial {
                    let stats = *serial.lock().unwrap_or_else(PoisonError::into_inner);
                    log_statistics("Modbus serial", stats);
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Address the Modbus/TCP server is bound to, once launched.
    pub fn modbus_addr(&self) -> Option<SocketAddr> {
        self.modbus_addr
    }

    /// Device shared by the Modbus transports, once launched.
    pub fn device(&self) -> Option<&SharedDevice> {
        self.device.as_ref()
    }

    pub fn adc(&self) -> Option<&Arc<AdcPipeline>> {
        self.adc.as_ref()
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Task failed: {:#}", e),
                Err(e) => error!("Task panicked: {}", e),
            }
        }
        info!("Daemon stopped");
        Ok(())
    }
}

/// Sleep for `duration` in short slices; `false` once `running` is cleared.
async fn sleep_while_running(running: &AtomicBool, duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(250);
    let mut remaining = duration;
    while !remaining.is_zero() {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(SLICE);
        time::sleep(step).await;
        remaining -= step;
    }
    running.load(Ordering::SeqCst)
}

fn log_statistics(transport: &str, stats: Statistics) {
    info!(
        "{} statistics: requests={} responses={} errors={} exceptions={}",
        transport,
        stats.requests_processed,
        stats.responses_sent,
        stats.errors_count,
        stats.exceptions_sent
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.modbus.port = 0;
        config.monitor.interval_ms = 10;
        config.monitor.statistics_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_launch_and_shutdown() {
        let mut daemon = Daemon::new();
        daemon.launch(&test_config()).await.unwrap();
        let addr = daemon.modbus_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(daemon.adc().unwrap().is_running());

        time::sleep(Duration::from_millis(50)).await;
        assert!(daemon.adc().unwrap().sample_count() > 0);

        daemon.shutdown();
        time::timeout(Duration::from_secs(5), daemon.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_launch_without_acquisition() {
        let mut config = test_config();
        config.acquisition.enabled = false;
        config.modbus.enabled = false;
        let mut daemon = Daemon::new();
        daemon.launch(&config).await.unwrap();
        assert!(daemon.adc().is_none());
        assert!(daemon.modbus_addr().is_none());
        assert!(daemon.device().is_some());
        daemon.shutdown();
        daemon.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_serial_device_fails_launch() {
        let mut config = test_config();
        config.modbus.enabled = false;
        config.serial.enabled = true;
        config.serial.device = "/nonexistent/tty-io-controller".to_string();
        let mut daemon = Daemon::new();
        assert!(daemon.launch(&config).await.is_err());
        daemon.shutdown();
        daemon.join().await.unwrap();
    }
}
