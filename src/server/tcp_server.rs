// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus/TCP server
//!
//! The accept loop owns the listening socket and hands every connection to
//! its own task. At most `max_connections` connections are served at once;
//! surplus connections are closed right after being accepted.
//!
//! Each connection handler:
//! 1. runs the periodic register update when the update interval has elapsed,
//! 2. waits for data with a bounded receive; a timeout simply loops back,
//! 3. reassembles MBAP frames, dispatches them, writes the response.
//!
//! Writes reach the hardware inside the dispatch, through [`SharedDevice`].
//!
//! A malformed MBAP header or a socket error closes the connection; the
//! server keeps accepting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;

use crate::daemon::pools;
use crate::modbus::types::TCP_MAX_FRAME_SIZE;
use crate::modbus::tcp::{self, TcpReceiver};
use crate::modbus::{ModbusContext, ModbusError};
use crate::peripherals::SharedDevice;

/// Dispatcher context shared by every connection.
pub type SharedContext = Arc<Mutex<ModbusContext<SharedDevice>>>;

/// Lock the shared context, recovering from a poisoned lock.
pub fn lock_context(context: &SharedContext) -> MutexGuard<'_, ModbusContext<SharedDevice>> {
    context.lock().unwrap_or_else(|poisoned| {
        warn!("Modbus context lock was poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

/// Runtime settings of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub max_connections: usize,
    /// Upper bound of every socket receive.
    pub receive_timeout: Duration,
    /// Period of the hardware → register update.
    pub update_interval: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_connections: pools::MAX_THREADS,
            receive_timeout: Duration::from_millis(5000),
            update_interval: Duration::from_millis(100),
        }
    }
}

pub struct ModbusTcpServer {
    listener: TcpListener,
    context: SharedContext,
    device: SharedDevice,
    settings: ServerSettings,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

impl ModbusTcpServer {
    /// Bind the listening socket with address reuse enabled.
    ///
    /// ### Errors
    ///
    /// Returns an error if the socket cannot be created, bound or put into
    /// listening state.
    pub async fn bind(
        address: SocketAddr,
        context: SharedContext,
        settings: ServerSettings,
    ) -> Result<Self> {
        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("Failed to create Modbus/TCP socket")?;
        socket
            .set_reuseaddr(true)
            .context("Failed to enable address reuse")?;
        socket
            .bind(address)
            .with_context(|| format!("Failed to bind Modbus/TCP server to {}", address))?;
        let listener = socket
            .listen(1024)
            .context("Failed to listen on Modbus/TCP socket")?;

        info!(
            "Modbus/TCP server listening on {} (max {} connections)",
            listener.local_addr()?,
            settings.max_connections
        );

        let device = lock_context(&context).access().clone();
        Ok(Self {
            listener,
            context,
            device,
            settings,
            permits: Arc::new(Semaphore::new(settings.max_connections.max(1))),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Counter of connections being served, for monitoring.
    pub fn active_connections(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    /// Accept connections until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<()> {
        while running.load(Ordering::SeqCst) {
            let accepted = tokio::select! {
                result = self.listener.accept() => result,
                _ = time::sleep(Duration::from_millis(250)) => continue,
            };
            let (stream, peer) = match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    error!("Failed to accept Modbus/TCP connection: {}", e);
                    continue;
                }
            };

            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        "Rejecting connection from {}: {} connections already active",
                        peer, self.settings.max_connections
                    );
                    drop(stream);
                    continue;
                }
            };

            let connection = Connection {
                stream,
                peer,
                context: Arc::clone(&self.context),
                device: self.device.clone(),
                settings: self.settings,
                running: Arc::clone(&running),
                active: Arc::clone(&self.active),
                _permit: permit,
            };
            tokio::spawn(connection.serve());
        }
        info!("Modbus/TCP server stopped");
        Ok(())
    }
}

/// Why a connection ended.
#[derive(Debug)]
enum Closed {
    ByPeer,
    Shutdown,
    Error(ModbusError),
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    context: SharedContext,
    device: SharedDevice,
    settings: ServerSettings,
    running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    async fn serve(mut self) {
        let count = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Modbus/TCP client {} connected ({} active)", self.peer, count);

        let reason = self.run().await;
        match &reason {
            Closed::ByPeer => info!("Modbus/TCP client {} disconnected", self.peer),
            Closed::Shutdown => debug!("Closing connection to {} for shutdown", self.peer),
            Closed::Error(e) => error!("Closing connection to {}: {}", self.peer, e),
        }
        let _ = self.stream.shutdown().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    async fn run(&mut self) -> Closed {
        let mut receiver = TcpReceiver::new(self.settings.receive_timeout);
        let mut rx = [0u8; TCP_MAX_FRAME_SIZE];
        let mut tx = [0u8; TCP_MAX_FRAME_SIZE];
        let mut last_update: Option<Instant> = None;
        // Wake up often enough to keep the hardware serviced while idle.
        let poll = self
            .settings
            .receive_timeout
            .min(self.settings.update_interval)
            .max(Duration::from_millis(1));

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Closed::Shutdown;
            }
            if update_due(last_update, self.settings.update_interval) {
                self.device.update_registers();
                last_update = Some(Instant::now());
            }

            let received = match time::timeout(poll, self.stream.read(&mut rx)).await {
                Err(_) => {
                    let now = Instant::now();
                    if receiver.is_timeout(now) {
                        warn!(
                            "Discarding partial frame from {} after {:?}",
                            self.peer, self.settings.receive_timeout
                        );
                        lock_context(&self.context).record_error(ModbusError::Timeout);
                        receiver.reset();
                    }
                    continue;
                }
                Ok(Ok(0)) => return Closed::ByPeer,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    debug!("Receive from {} failed: {}", self.peer, e);
                    return Closed::Error(ModbusError::Transport);
                }
            };

            let mut offset = 0;
            while offset < received {
                let now = Instant::now();
                let consumed = match receiver.feed(&rx[offset..received], now) {
                    Ok(consumed) => consumed,
                    Err(e) => {
                        lock_context(&self.context).record_error(e);
                        return Closed::Error(e);
                    }
                };
                offset += consumed;
                if !receiver.is_complete() {
                    continue;
                }

                let response_len = match self.dispatch(&receiver, &mut tx) {
                    Ok(len) => len,
                    Err(e) => return Closed::Error(e),
                };
                receiver.reset();

                if let Some(len) = response_len {
                    if let Err(e) = self.stream.write_all(&tx[..len]).await {
                        debug!("Send to {} failed: {}", self.peer, e);
                        return Closed::Error(ModbusError::Transport);
                    }
                }

            }
        }
    }

    /// Parse and dispatch the complete frame held by `receiver`.
    ///
    /// Returns the length of the response frame in `tx`, `None` when no
    /// response is due.
    fn dispatch(&self, receiver: &TcpReceiver, tx: &mut [u8]) -> Result<Option<usize>, ModbusError> {
        let mut context = lock_context(&self.context);
        let request = match receiver.frame().and_then(tcp::parse_frame) {
            Ok(request) => request,
            Err(e) => {
                context.record_error(e);
                return Err(e);
            }
        };
        match context.process_adu(&request)? {
            Some(response) => Ok(Some(tcp::build_frame(&response, tx)?)),
            None => Ok(None),
        }
    }
}

fn update_due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= interval)
}
