// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! The kernel's error taxonomy is deliberately small and split in two. A
//! [`FatalError`] is a programming error in the application or the kernel
//! itself; there is no meaningful way to recover from one on a
//! microcontroller, so [`fatal`] renders a stable message and halts through
//! the panic machinery (on bare metal that lands in `fail`, which records an
//! epitaph where a debugger can find it). Recoverable conditions — currently
//! only the soft-timer table operations — return `Result` instead.

use core::fmt;

/// An unrecoverable programming error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FatalError {
    /// Task creation was attempted with every user task slot taken.
    TaskCapacity,
    /// Semaphore creation was attempted with every semaphore slot taken.
    SemCapacity,
    /// A task stack cannot hold even the initial saved-register frame.
    StackTooSmall,
    /// A kernel operation was invoked before `init`.
    NotInitialized,
    /// Two mutex owners block on each other's semaphores; neither can ever
    /// run again to signal.
    Deadlock,
    /// A semaphore's value claimed a waiter but the blocked list held none.
    /// Reaching this is itself a kernel bug.
    MissingWaiter,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FatalError::TaskCapacity => "task table exhausted",
            FatalError::SemCapacity => "semaphore table exhausted",
            FatalError::StackTooSmall => "stack too small for initial frame",
            FatalError::NotInitialized => "kernel not initialized",
            FatalError::Deadlock => "deadlock between mutex owners",
            FatalError::MissingWaiter => "blocked list missing waiter",
        };
        f.write_str(msg)
    }
}

/// Reports `e` and halts. Does not return.
pub fn fatal(e: FatalError) -> ! {
    panic!("kernel fatal: {}", e);
}

/// Failure modes of the soft-timer table. These are the kernel's only
/// recoverable errors; a full table is an expected runtime condition, not a
/// programming bug.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerError {
    /// Every soft-timer slot is in use.
    TableFull,
    /// The handle does not name a live timer.
    InvalidHandle,
}
