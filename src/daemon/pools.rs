// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Kernel object budget of the controller
//!
//! The controller board sizes its RTOS pools statically. The daemon keeps
//! the same budget: one worker per TCP connection out of [`MAX_THREADS`].
//!
//! | Pool | Count |
//! |------|-------|
//! | Mutexes | 8 |
//! | Semaphores | 16 |
//! | Mailboxes | 8 × 16 entries |
//! | Threads | 4 × 512-word stacks |

pub const MAX_MUTEXES: usize = 8;
pub const MAX_SEMAPHORES: usize = 16;
pub const MAX_MAILBOXES: usize = 8;
pub const MAILBOX_DEPTH: usize = 16;
pub const MAX_THREADS: usize = 4;
pub const THREAD_STACK_WORDS: usize = 512;

/// Whether `connections` concurrent TCP clients fit in the thread pool.
pub const fn fits_thread_pool(connections: usize) -> bool {
    connections <= MAX_THREADS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connection_limit_fits() {
        assert!(fits_thread_pool(crate::config::ModbusConfig::default().max_connections));
        assert!(!fits_thread_pool(MAX_THREADS + 1));
    }
}
