// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time kernel configuration.
//!
//! The kernel takes a single shape fixed at build time; these constants are
//! that shape. Applications that need different table sizes or timing rebuild
//! the kernel with this file adjusted.

use static_assertions::const_assert;

/// Most important priority a user task may hold. Smaller numbers are more
/// important.
pub const PRIORITY_HIGHEST: u8 = 1;

/// Least important priority a user task may hold.
pub const PRIORITY_LOWEST: u8 = 254;

/// Priority of the idle task, strictly below every user task. Outside the
/// range handed out to user tasks; nothing else may use it.
pub const PRIORITY_IDLE: u8 = PRIORITY_LOWEST + 1;

/// Number of user task slots. The task table holds one more than this for the
/// idle task.
pub const NUM_USER_TASKS: usize = 10;

/// Total task-table size, including the idle task.
pub const NUM_TASKS: usize = NUM_USER_TASKS + 1;

/// Number of semaphore slots.
pub const NUM_SEMAPHORES: usize = 16;

/// Number of entries in the soft-timer table.
pub const NUM_SOFT_TIMERS: usize = 8;

/// Period of the hardware tick, in milliseconds.
pub const TICK_MS: u32 = 1;

/// Maximum time a ready task runs before the tick service forces a
/// reschedule, in milliseconds.
pub const TIME_SLICE_MS: u32 = 5;

/// Core clock in kHz, recorded for debuggers and used to derive the tick
/// timer's reload value.
pub const SYSCLOCK_KHZ: u32 = 80_000;

/// One element of a task stack. Stacks are machine-word arrays so the same
/// frame-priming code serves 32-bit targets and the test host.
pub type StackElement = usize;

const_assert!(PRIORITY_HIGHEST < PRIORITY_LOWEST);
const_assert!(TICK_MS > 0);
const_assert!(TIME_SLICE_MS >= TICK_MS);
const_assert!(NUM_USER_TASKS > 0);
