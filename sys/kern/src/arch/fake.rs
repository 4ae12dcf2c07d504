// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board-support stand-ins for hosted builds.
//!
//! The kernel proper never touches hardware directly; everything it needs
//! from the board funnels through the handful of functions here. On a host
//! there are no interrupts to mask, so the critical section degrades to a
//! thread-local flag with the same capture-and-restore shape, and a
//! context-switch request just bumps a counter that tests can observe.
//! Actual dispatch is impossible — `start_first_task` says so loudly.

use core::cell::Cell;

use crate::config::StackElement;
use crate::task::{Task, TaskEntry};

macro_rules! klog {
    ($s:expr) => { println!($s) };
    ($s:expr, $($tt:tt)*) => { println!($s, $($tt)*) };
}

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

/// Number of words in the initial saved-register frame; also the minimum
/// viable stack size.
pub const FRAME_WORDS: usize = 16;

/// Canonical initial status-register value (Thumb bit set).
const INITIAL_PSR: usize = 1 << 24;

thread_local! {
    static INTERRUPTS_MASKED: Cell<bool> = const { Cell::new(false) };
    static PENDED_SWITCHES: Cell<u32> = const { Cell::new(0) };
    static CLOCK_FREQ_KHZ: Cell<u32> = const { Cell::new(0) };
}

/// Captures the current mask state and masks "interrupts". Returns the prior
/// state for the matching `critical_exit`, so nesting behaves.
pub fn critical_enter() -> u32 {
    INTERRUPTS_MASKED.with(|m| m.replace(true)) as u32
}

/// Restores the mask state captured by `critical_enter`.
pub fn critical_exit(mask: u32) {
    INTERRUPTS_MASKED.with(|m| m.set(mask != 0));
}

pub fn enable_interrupts() {
    INTERRUPTS_MASKED.with(|m| m.set(false));
}

pub fn disable_interrupts() {
    INTERRUPTS_MASKED.with(|m| m.set(true));
}

/// Records a deferred context-switch request. Tests drain the count with
/// [`take_context_switches`].
pub fn pend_context_switch() {
    PENDED_SWITCHES.with(|p| p.set(p.get() + 1));
}

/// Returns how many context switches have been requested since the last
/// call, and resets the count.
pub fn take_context_switches() -> u32 {
    PENDED_SWITCHES.with(|p| p.replace(0))
}

/// Records the core clock for debugger-style inspection.
pub fn set_clock_freq(khz: u32) {
    CLOCK_FREQ_KHZ.with(|c| c.set(khz));
}

/// Writes the initial saved-register frame at the top of `stack` and returns
/// the address the first dispatch would restore from.
///
/// Layout matches the hardware exception frame with the callee-saved window
/// below it; the general-purpose slots carry recognisable fill patterns to
/// aid stack inspection.
pub fn prime_stack(stack: &mut [StackElement], entry: TaskEntry) -> usize {
    let len = stack.len();
    stack[len - 1] = INITIAL_PSR;
    stack[len - 2] = entry as usize; // resume point
    stack[len - 3] = 0x1414_1414; // poison lr: tasks must not return
    stack[len - 4] = 0x1212_1212; // r12
    stack[len - 5] = 0x0303_0303; // r3
    stack[len - 6] = 0x0202_0202;
    stack[len - 7] = 0x0101_0101;
    stack[len - 8] = 0x0000_0000; // r0
    stack[len - 9] = 0x1111_1111; // r11
    stack[len - 10] = 0x1010_1010;
    stack[len - 11] = 0x0909_0909;
    stack[len - 12] = 0x0808_0808;
    stack[len - 13] = 0x0707_0707;
    stack[len - 14] = 0x0606_0606;
    stack[len - 15] = 0x0505_0505;
    stack[len - 16] = 0x0404_0404; // r4
    &stack[len - FRAME_WORDS] as *const StackElement as usize
}

/// Hosted builds have no task context to dispatch into.
///
/// # Safety
///
/// Trivially safe; it only panics. The signature matches the real port.
pub unsafe fn start_first_task(_task: *mut Task) -> ! {
    panic!("context switching is not available on this target");
}
