// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minnow kernel.
//!
//! A small fixed-priority preemptive multitasking kernel for single-core
//! microcontrollers. Time comes from a periodic hardware tick; deferred
//! context switches ride a low-priority software interrupt. On top of the
//! scheduler the kernel offers timed sleep, periodic task releases derived
//! from the tick, a mutex with chained priority inheritance, a binary
//! signalling flag, and a table of soft periodic events.
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. Static configuration. All storage — task control blocks, semaphores,
//!    soft timers — is allocated up front from fixed tables sized in
//!    [`config`]; the kernel never allocates.
//! 2. A strong preference for safe code where reasonable. Tasks are named by
//!    small table indices rather than pointers, so the membership lists and
//!    the task/semaphore cross-references never alias.
//! 3. A preference for simple and clear algorithms over fast and clever
//!    algorithms. The task tables are small; linear scans are fine.
//!
//! Everything that touches kernel state does so inside an interrupt-masking
//! critical section (see [`arch`]). Code outside the `arch` module is
//! portable; the same kernel logic that runs on an ARMv7-M target is
//! exercised by the test suite on a development host.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod api;
pub mod buf;
pub mod config;
pub mod err;
pub mod kernel;
pub mod list;
pub mod sema;
pub mod startup;
pub mod task;
pub mod time;
pub mod timers;

#[cfg(target_os = "none")]
pub mod fail;
