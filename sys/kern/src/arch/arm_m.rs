// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M and up.
//!
//! # Interrupt layout
//!
//! The kernel claims three exceptions; the application's vector table must
//! route them to the handlers defined here (a `cortex-m-rt` build does this
//! by name):
//!
//! - `SysTick` drives kernel time. Each interrupt runs the tick service,
//!   which ages sleeps, periodic releases, and soft timers.
//! - `PendSV` performs deferred context switches. Anything that changes the
//!   runnable set — the tick service, a semaphore operation, `sleep` — pokes
//!   the PendSV pend bit instead of switching on the spot, and the switch
//!   happens once the interrupt chain unwinds.
//! - `SVCall` is used exactly once, to exception-return into the first task
//!   at launch.
//!
//! All three run at the lowest exception priority, so none of them can
//!   preempt kernel code; task code keeps them out with the PRIMASK-based
//! critical section below.
//!
//! # Task stacks
//!
//! Tasks run privileged in thread mode on PSP. A suspended task's stack
//! holds, from its `stack_top` upward: the callee-saved window (r4-r11)
//! stored by `PendSV`, then the hardware exception frame (r0-r3, r12, lr,
//! pc, xPSR). `prime_stack` forges exactly this shape for a task that has
//! never run, and the task control block keeps `stack_top` as its first
//! field so the handler assembly can reach it at offset zero.

use core::arch::{asm, global_asm};
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::config::{self, StackElement};
use crate::task::{NextTask, Task, TaskEntry};

/// Log things from kernel context, via semihosting (the "klog-semihosting"
/// feature) or the ITM (the "klog-itm" feature). With neither enabled,
/// `klog!` compiles to nothing.
#[cfg(not(any(feature = "klog-semihosting", feature = "klog-itm")))]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

#[cfg(feature = "klog-itm")]
macro_rules! klog {
    ($s:expr) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::ptr()).stim[0];
            cortex_m::iprintln!(stim, $s);
        }
    };
    ($s:expr, $($tt:tt)*) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::ptr()).stim[0];
            cortex_m::iprintln!(stim, $s, $($tt)*);
        }
    };
}

#[cfg(feature = "klog-semihosting")]
macro_rules! klog {
    ($s:expr) => { let _ = cortex_m_semihosting::hprintln!($s); };
    ($s:expr, $($tt:tt)*) => { let _ = cortex_m_semihosting::hprintln!($s, $($tt)*); };
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

/// Number of words in the initial saved-register frame; also the minimum
/// viable stack size.
pub const FRAME_WORDS: usize = 16;

/// Canonical initial xPSR value: just the Thumb bit.
const INITIAL_PSR: usize = 1 << 24;

/// On ARMvx-M we have to use a global to record the current task pointer,
/// since we don't have a scratch register. The handler assembly below
/// reaches through it to the task's `stack_top`.
#[no_mangle]
static CURRENT_TASK_PTR: AtomicPtr<Task> = AtomicPtr::new(core::ptr::null_mut());

/// To allow our clock frequency to be easily determined from a debugger, we
/// store it in memory.
#[no_mangle]
static CLOCK_FREQ_KHZ: AtomicU32 = AtomicU32::new(0);

/// Captures PRIMASK and masks exceptions. Returns nonzero if they were
/// already masked, so nested sections restore correctly.
pub fn critical_enter() -> u32 {
    let primask = cortex_m::register::primask::read();
    cortex_m::interrupt::disable();
    primask.is_active() as u32
}

/// Restores the mask state captured by `critical_enter`.
pub fn critical_exit(mask: u32) {
    if mask == 0 {
        // Safety: we are re-enabling exceptions that were enabled when the
        // matching critical_enter ran; no references to kernel state survive
        // past this point.
        unsafe { cortex_m::interrupt::enable() }
    }
}

pub fn enable_interrupts() {
    // Safety: the boot sequence calls this exactly once, after init.
    unsafe { cortex_m::interrupt::enable() }
}

pub fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

/// Requests a deferred context switch. PendSV fires once the current
/// interrupt chain (if any) unwinds.
pub fn pend_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Records the core clock; the SysTick reload value is derived from this at
/// launch.
pub fn set_clock_freq(khz: u32) {
    CLOCK_FREQ_KHZ.store(khz, Ordering::Relaxed);
}

/// Writes the initial saved-register frame at the top of `stack` and returns
/// the address the first dispatch restores from.
///
/// The general-purpose slots carry recognisable fill patterns; they make
/// never-ran tasks easy to spot in a memory dump and are otherwise
/// immaterial.
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

/// Configures the kernel's exceptions and timer, then dispatches into
/// `task`. Does not return.
///
/// # Safety
///
/// `task` must point at a primed entry of the installed kernel's task table,
/// and this must be the only call site, at the end of the boot sequence.
pub unsafe fn start_first_task(task: *mut Task) -> ! {
    {
        // Keep the kernel non-preemptive: SVCall, PendSV, and SysTick all go
        // to the lowest configurable priority so they can't interrupt one
        // another, only task code.
        let scb = &*cortex_m::peripheral::SCB::ptr();
        scb.shpr[7].write(0xFF); // SVCall
        scb.shpr[10].write(0xFF); // PendSV
        scb.shpr[11].write(0xFF); // SysTick

        // One SysTick interrupt per kernel tick.
        let syst = &*cortex_m::peripheral::SYST::ptr();
        let reload = CLOCK_FREQ_KHZ.load(Ordering::Relaxed) * config::TICK_MS - 1;
        syst.rvr.write(reload);
        syst.cvr.write(0);
        syst.csr.modify(|v| v | 0b111); // core clock, interrupt, enable
    }

    CURRENT_TASK_PTR.store(task, Ordering::Relaxed);

    // Restore the callee-saved window from the primed stack, point PSP at
    // the hardware frame, and let SVCall exception-return into the task.
    asm!(
        "ldr r0, [{task}]",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "svc #0xFF",
        "udf #0xad",
        task = in(reg) task,
        options(noreturn),
    )
}

global_asm! {"
    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    .thumb_func
    SVCall:
        @ only reached once, from start_first_task: flip thread mode onto
        @ PSP and exception-return into the frame prepared there.
        movs r0, #2
        msr CONTROL, r0
        isb
        mvn lr, #2              @ EXC_RETURN: thread mode, PSP, basic frame
        bx lr
"}

global_asm! {"
    .section .text.PendSV
    .globl PendSV
    .type PendSV,function
    .thumb_func
    PendSV:
        @ park the outgoing task: the hardware already stacked r0-r3, r12,
        @ lr, pc, xPSR on its PSP; store the callee-saved window below that
        @ and record the resulting stack top in the task control block.
        mrs r0, psp
        stmdb r0!, {{r4-r11}}
        ldr r1, =CURRENT_TASK_PTR
        ldr r2, [r1]
        str r0, [r2]

        push {{r3, lr}}
        bl pendsv_entry
        pop {{r3, lr}}

        @ unpark whichever task the scheduler chose.
        ldr r1, =CURRENT_TASK_PTR
        ldr r2, [r1]
        ldr r0, [r2]
        ldmia r0!, {{r4-r11}}
        msr psp, r0
        bx lr
"}

/// The Rust half of `PendSV`, called with the outgoing context saved.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    // Safety: PendSV runs at the lowest priority and task-side kernel
    // entries mask it out, so nothing else is inside the kernel now.
    crate::startup::with_kernel(|k| {
        k.schedule();
        CURRENT_TASK_PTR.store(k.current_task_ptr(), Ordering::Relaxed);
    });
}

/// Handler for the System Tick Timer interrupt. (Name is dictated by the
/// vector table.)
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    // Safety: same priority argument as pendsv_entry.
    let switch = crate::startup::with_kernel(|k| k.tick());
    // The entry sequence to this ISR doesn't save state for a switch;
    // defer it to PendSV.
    if switch != NextTask::Same {
        pend_context_switch();
    }
}
