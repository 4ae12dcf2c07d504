// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The call surface for task and board code.
//!
//! Every function here is a thin bracket around one kernel operation: enter
//! the critical section, perform the operation on the global kernel, leave
//! the critical section, and request a deferred context switch if the
//! operation says the runnable set changed. The kernel methods themselves
//! never touch the interrupt hardware, so everything below is reusable
//! verbatim by tests driving a `Kernel` value directly.

use abi::{SemId, SemKind, TaskId, TimerId};

use crate::arch;
use crate::buf::SyncFifo;
use crate::config::StackElement;
use crate::err::TimerError;
use crate::startup::with_kernel;
use crate::task::{NextTask, TaskEntry};

/// Runs `body` on the kernel inside a critical section.
fn enter<R>(body: impl FnOnce(&mut crate::kernel::Kernel) -> R) -> R {
    let mask = arch::critical_enter();
    // Safety: interrupts are masked for the duration of `body`.
    let r = unsafe { with_kernel(body) };
    arch::critical_exit(mask);
    r
}

/// Like `enter`, then requests a context switch if the operation asked for
/// one. The request is made after the critical section closes, so the switch
/// happens on the way out rather than inside kernel code.
fn enter_sched(body: impl FnOnce(&mut crate::kernel::Kernel) -> NextTask) {
    if enter(body) == NextTask::Other {
        arch::pend_context_switch();
    }
}

/// Creates a task ready to run at `priority` (clamped into the user range).
/// `stack` must outlive the system, which in practice means a static buffer.
pub fn create_task(
    entry: TaskEntry,
    stack: &'static mut [StackElement],
    priority: u8,
    identifier: &'static str,
) -> TaskId {
    let (id, hint) = enter(|k| k.create_task(entry, stack, priority, identifier));
    if hint == NextTask::Other {
        arch::pend_context_switch();
    }
    id
}

/// Creates a task the tick service releases every `period_ms` milliseconds.
/// Each release runs until the task calls [`relinquish`]; a release that
/// overruns its period is not re-entered concurrently.
pub fn create_periodic_task(
    entry: TaskEntry,
    stack: &'static mut [StackElement],
    priority: u8,
    period_ms: u32,
    identifier: &'static str,
) -> TaskId {
    enter(|k| k.create_periodic_task(entry, stack, priority, period_ms, identifier))
}

/// Parks the calling task for at least `ms` milliseconds. Wake-up is aligned
/// to the tick, so the actual delay can exceed `ms` by up to one tick.
pub fn sleep(ms: u32) {
    enter_sched(|k| k.sleep(ms));
}

/// Ends the calling task's current release. Periodic tasks leave the ready
/// list until their next period; aperiodic tasks just yield the processor to
/// an equal-priority peer.
pub fn relinquish() {
    enter_sched(|k| k.relinquish());
}

/// Allocates a semaphore. Mutexes start available; flags start empty.
pub fn sem_create(kind: SemKind) -> SemId {
    enter(|k| k.sem_create(kind))
}

/// Takes `sem`, blocking until it is available. Must not be called from
/// interrupt context or from the idle task — both must always stay runnable.
pub fn sem_wait(sem: SemId) {
    enter_sched(|k| k.sem_wait(sem));
}

/// Releases `sem`, waking its foremost waiter. Callable from interrupt
/// handlers; a woken task that outranks the interrupted one runs as soon as
/// the handler chain unwinds.
pub fn sem_signal(sem: SemId) {
    enter_sched(|k| k.sem_signal(sem));
}

/// Registers `callback` to run every `period_ms` milliseconds in tick
/// context. The callback executes inside the kernel's critical section: keep
/// it short, never block, and touch the kernel only via [`sem_signal`].
pub fn timer_create(callback: fn(), period_ms: u32) -> Result<TimerId, TimerError> {
    enter(|k| k.timer_create(callback, period_ms))
}

/// Releases the soft timer behind `id`.
pub fn timer_destroy(id: TimerId) -> Result<(), TimerError> {
    enter(|k| k.timer_destroy(id))
}

/// Arranges for `sem` to be signalled every `period_ms` milliseconds,
/// typically to pace a task blocked in [`sem_wait`].
pub fn periodic_signal_start(sem: SemId, period_ms: u32) -> Result<TimerId, TimerError> {
    enter(|k| k.periodic_signal_start(sem, period_ms))
}

/// Stops the periodic signal behind `id`.
pub fn periodic_signal_stop(id: TimerId) -> Result<(), TimerError> {
    enter(|k| k.periodic_signal_stop(id))
}

/// Ticks since boot.
pub fn tick_count() -> u64 {
    enter(|k| k.tick_count().into())
}

/// Wraps `data` as a shared buffer guarded by a freshly created mutex.
pub fn buffer_create<T: Copy>(data: &'static mut [T]) -> SyncFifo<'static, T> {
    let sem = sem_create(SemKind::Mutex);
    SyncFifo::new(sem, data)
}

/// Appends `src` to the shared buffer. Blocks while another task holds the
/// buffer; evicts the oldest unread data on overfill (see `buf`).
pub fn buffer_write<T: Copy>(buf: &mut SyncFifo<'_, T>, src: &[T]) {
    sem_wait(buf.sem);
    let mask = arch::critical_enter();
    buf.fifo.write(src);
    arch::critical_exit(mask);
    sem_signal(buf.sem);
}

/// Copies up to `dst.len()` unread elements out of the shared buffer,
/// returning the count. Blocks while another task holds the buffer.
pub fn buffer_read<T: Copy>(buf: &mut SyncFifo<'_, T>, dst: &mut [T]) -> usize {
    sem_wait(buf.sem);
    let mask = arch::critical_enter();
    let n = buf.fifo.read(dst);
    arch::critical_exit(mask);
    sem_signal(buf.sem);
    n
}
