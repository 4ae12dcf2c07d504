// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup: the one-time global kernel instance and the boot
//! sequence.
//!
//! The board glue is expected to bring up clocks, call [`init`] exactly once
//! to install the kernel and its idle task, create the application's tasks
//! and synchronization objects through `api`, and finally call [`launch`],
//! which never returns.

use crate::arch;
use crate::config::StackElement;
use crate::err::{self, FatalError};
use crate::kernel::Kernel;
use crate::task::TaskEntry;

/// The kernel. `None` until `init` runs; from then on the sole instance,
/// reached only through `with_kernel`.
static mut KERNEL: Option<Kernel> = None;

/// One-time kernel initialization.
///
/// Masks interrupts, records the configured core clock, and installs a
/// kernel whose idle task runs `idle_entry` on `idle_stack`. Every task and
/// semaphore creation must come after this (they trap otherwise) and before
/// `launch`.
pub fn init(idle_entry: TaskEntry, idle_stack: &'static mut [StackElement]) {
    arch::disable_interrupts();
    arch::set_clock_freq(crate::config::SYSCLOCK_KHZ);
    let k = Kernel::new(idle_entry, idle_stack);
    // Safety: interrupts are masked and nothing else has observed the global
    // yet; the uassert catches a second call.
    unsafe {
        let slot = &mut *core::ptr::addr_of_mut!(KERNEL);
        uassert!(slot.is_none());
        *slot = Some(k);
    }
    klog!("kernel: initialized");
}

/// Hands `body` exclusive access to the kernel.
///
/// # Safety
///
/// The caller must guarantee exclusivity: either interrupts are masked (a
/// critical section, the normal case) or the call site is an interrupt
/// handler that cannot be preempted by another kernel entry. Don't stash the
/// reference.
pub(crate) unsafe fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    match &mut *core::ptr::addr_of_mut!(KERNEL) {
        Some(k) => body(k),
        None => err::fatal(FatalError::NotInitialized),
    }
}

/// Starts multitasking. Never returns; the first dispatch lands in the most
/// important ready task, or the idle task if none exists.
pub fn launch() -> ! {
    let first = unsafe {
        with_kernel(|k| {
            k.schedule();
            k.current_task_ptr()
        })
    };
    klog!("kernel: launching");
    arch::enable_interrupts();
    // Safety: `first` points into the installed kernel's task table, which
    // lives for the rest of the program.
    unsafe { arch::start_first_task(first) }
}
