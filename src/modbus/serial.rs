// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial (RTU/ASCII) session driver
//!
//! Couples a receive state machine with a [`ModbusContext`]. The UART side is
//! reduced to two entry points: [`SerialSession::feed`] for every received
//! byte and [`SerialSession::poll`] from a periodic timer. Both return the
//! response frame to transmit, if any.
//!
//! Frames failing CRC, LRC or framing checks are dropped silently on the wire;
//! they are logged and counted in the context's `errors_count`.

use std::time::{Duration, Instant};

use log::warn;

use super::ascii::{self, AsciiReceiver, AsciiRxState};
use super::callbacks::{ModbusHooks, NoHooks, RegisterAccess};
use super::dispatcher::ModbusContext;
use super::rtu::{self, RtuReceiver, RtuRxState};
use super::types::{Adu, ModbusError, ModbusResult, Protocol, ASCII_MAX_FRAME_SIZE};

enum Receiver {
    Rtu(RtuReceiver),
    Ascii(AsciiReceiver),
}

/// One serial line served by one slave context.
pub struct SerialSession<A: RegisterAccess, H: ModbusHooks = NoHooks> {
    context: ModbusContext<A, H>,
    receiver: Receiver,
    last_byte_at: Option<Instant>,
    tx: [u8; ASCII_MAX_FRAME_SIZE],
}

impl<A: RegisterAccess, H: ModbusHooks> SerialSession<A, H> {
    /// RTU session timed for `baud_rate`.
    pub fn rtu(context: ModbusContext<A, H>, baud_rate: u32) -> Self {
        Self::with_receiver(context, Receiver::Rtu(RtuReceiver::new(baud_rate)))
    }

    /// RTU session with explicit inter-character and inter-frame timing.
    pub fn rtu_with_timing(
        context: ModbusContext<A, H>,
        interchar_timeout: Duration,
        interframe_delay: Duration,
    ) -> Self {
        Self::with_receiver(
            context,
            Receiver::Rtu(RtuReceiver::with_timing(interchar_timeout, interframe_delay)),
        )
    }

    /// ASCII session aborting frames older than `frame_timeout`.
    pub fn ascii(context: ModbusContext<A, H>, frame_timeout: Duration) -> Self {
        Self::with_receiver(context, Receiver::Ascii(AsciiReceiver::new(frame_timeout)))
    }

    /// Session for the protocol the context is configured with.
    ///
    /// ### Errors
    ///
    /// `InvalidParam` for a TCP context.
    pub fn for_context(
        context: ModbusContext<A, H>,
        baud_rate: u32,
        ascii_timeout: Duration,
    ) -> ModbusResult<Self> {
        match context.config().protocol {
            Protocol::Rtu => Ok(Self::rtu(context, baud_rate)),
            Protocol::Ascii => Ok(Self::ascii(context, ascii_timeout)),
            Protocol::Tcp => Err(ModbusError::InvalidParam),
        }
    }

    fn with_receiver(context: ModbusContext<A, H>, receiver: Receiver) -> Self {
        Self {
            context,
            receiver,
            last_byte_at: None,
            tx: [0; ASCII_MAX_FRAME_SIZE],
        }
    }

    pub fn context(&self) -> &ModbusContext<A, H> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ModbusContext<A, H> {
        &mut self.context
    }

    /// Handle one received byte.
    ///
    /// For RTU a pending frame completed by the silence before this byte is
    /// answered first; for ASCII the final LF completes the frame.
    pub fn feed(&mut self, byte: u8, now: Instant) -> Option<&[u8]> {
        let response = match &mut self.receiver {
            Receiver::Rtu(rx) => {
                let pending = if rx.is_complete(now) {
                    self.handle_frame()
                } else {
                    self.recover(now);
                    None
                };
                if let Receiver::Rtu(rx) = &mut self.receiver {
                    rx.feed(byte, now);
                }
                pending
            }
            Receiver::Ascii(rx) => match rx.feed(byte, now) {
                Ok(AsciiRxState::Complete) => self.handle_frame(),
                Ok(_) => None,
                Err(err) => {
                    self.drop_frame(err);
                    None
                }
            },
        };
        self.last_byte_at = Some(now);
        response.map(|len| &self.tx[..len])
    }

    /// End of the pending RTU frame when its bytes already form a whole
    /// request: the instant the line would have been quiet for the
    /// inter-frame delay. Polling at that instant closes the frame, which
    /// separates requests delivered back to back in one read.
    pub fn request_end(&self) -> Option<Instant> {
        match &self.receiver {
            Receiver::Rtu(rx) if rx.holds_complete_request() => {
                self.last_byte_at.map(|at| at + rx.interframe_delay())
            }
            _ => None,
        }
    }

    /// Timer entry point: completes RTU frames on silence and expires stale
    /// ASCII frames.
    pub fn poll(&mut self, now: Instant) -> Option<&[u8]> {
        let complete = match &mut self.receiver {
            Receiver::Rtu(rx) => rx.is_complete(now),
            Receiver::Ascii(rx) => {
                if rx.check_timeout(now) {
                    self.drop_frame(ModbusError::Timeout);
                }
                false
            }
        };
        if complete {
            return self.handle_frame().map(|len| &self.tx[..len]);
        }
        self.recover(now);
        None
    }

    // An RTU receiver in `Error` waits for the line to go quiet before
    // accepting a new frame, so the tail of a bad frame is discarded.
    fn recover(&mut self, now: Instant) {
        if let Receiver::Rtu(rx) = &mut self.receiver {
            if rx.state() != RtuRxState::Error {
                return;
            }
            let quiet = self
                .last_byte_at
                .map_or(true, |at| now.saturating_duration_since(at) >= rx.interframe_delay());
            if quiet {
                let err = rx.error().unwrap_or(ModbusError::Frame);
                self.drop_frame(err);
            }
        }
    }

    fn drop_frame(&mut self, err: ModbusError) {
        warn!("Dropping serial frame: {}", err);
        self.context.record_error(err);
        self.reset_receiver();
    }

    fn reset_receiver(&mut self) {
        match &mut self.receiver {
            Receiver::Rtu(rx) => rx.reset(),
            Receiver::Ascii(rx) => rx.reset(),
        }
    }

    fn handle_frame(&mut self) -> Option<usize> {
        let parsed = match &self.receiver {
            Receiver::Rtu(rx) => rx.frame().map(rtu::parse_frame),
            Receiver::Ascii(rx) => rx.frame().map(ascii::parse_frame),
        }?;
        self.reset_receiver();

        let request = match parsed {
            Ok(adu) => adu,
            Err(err) => {
                self.drop_frame(err);
                return None;
            }
        };
        let response = match self.context.process_adu(&request) {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(err) => {
                warn!("Serial request not processed: {}", err);
                return None;
            }
        };
        self.build(&response)
    }

    fn build(&mut self, response: &Adu) -> Option<usize> {
        let built = match self.receiver {
            Receiver::Rtu(_) => rtu::build_frame(response, &mut self.tx),
            Receiver::Ascii(_) => ascii::build_frame(response, &mut self.tx),
        };
        match built {
            Ok(len) => Some(len),
            Err(err) => {
                self.context.record_error(err);
                None
            }
        }
    }
}
