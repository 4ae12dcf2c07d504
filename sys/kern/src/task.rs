// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.

use abi::{Priority, SemId, TaskId, TaskState};

use crate::config::{self, StackElement};
use crate::err::{self, FatalError};

/// Signature of a task entry function. Task code never returns; the primed
/// link-register slot holds a poison value that faults if it tries.
pub type TaskEntry = fn() -> !;

/// Internal representation of a task.
///
/// One of these exists per slot in the kernel's task table, whether or not a
/// task has been created in that slot. A task is a member of exactly one of
/// the ready/sleep/blocked lists unless its state is `Inactive` (or it is the
/// idle task, which is scheduled without ever joining a list).
#[repr(C)] // so the location of stack_top is predictable
#[derive(Debug)]
pub struct Task {
    /// Where the saved register window begins. The context-switch handler
    /// addresses this field at offset zero, so it must stay first.
    pub(crate) stack_top: usize,
    /// Base address of the caller-owned stack region.
    pub(crate) stack_base: usize,
    /// Length of the stack region, in elements.
    pub(crate) stack_len: usize,
    /// Caller-provided label, for diagnostics and lookup only.
    pub(crate) identifier: &'static str,
    /// Priority assigned at creation. Never changes.
    pub(crate) base_priority: Priority,
    /// Effective priority: equals `base_priority` except while elevated by
    /// priority inheritance, and is never less important than it.
    pub(crate) priority: Priority,
    /// State used to make status and scheduling decisions.
    pub(crate) state: TaskState,
    /// Milliseconds of sleep left; nonzero only while `Asleep`.
    pub(crate) sleep_ms: u32,
    /// The semaphore this task is blocked on, if any. Followed by the
    /// priority-inheritance chain walk.
    pub(crate) blocked_on: Option<SemId>,
    /// Release period; zero means the task is aperiodic.
    pub(crate) base_period_ms: u32,
    /// Milliseconds until the next release.
    pub(crate) period_ms: u32,
    /// Set once a periodic task finishes a release; cleared when the tick
    /// service re-releases it. An instance still running at its period
    /// boundary is not released again.
    pub(crate) has_fully_ran: bool,
    /// Link to the following task in whichever list currently owns this one.
    pub(crate) next: Option<TaskId>,
    /// Link to the preceding task in whichever list currently owns this one.
    pub(crate) prev: Option<TaskId>,
}

impl Task {
    /// Contents of an unused task-table slot.
    pub(crate) const EMPTY: Task = Task {
        stack_top: 0,
        stack_base: 0,
        stack_len: 0,
        identifier: "",
        base_priority: Priority(config::PRIORITY_LOWEST),
        priority: Priority(config::PRIORITY_LOWEST),
        state: TaskState::Inactive,
        sleep_ms: 0,
        blocked_on: None,
        base_period_ms: 0,
        period_ms: 0,
        has_fully_ran: false,
        next: None,
        prev: None,
    };

    /// Builds a task over the caller-owned `stack`, priming the initial saved
    /// register window at its top so the first dispatch restores straight
    /// into `entry`.
    ///
    /// The priority must already be validated; this is the one place stack
    /// size is checked (the stack has to fit at least the initial frame).
    pub(crate) fn new(
        entry: TaskEntry,
        stack: &'static mut [StackElement],
        priority: Priority,
        identifier: &'static str,
    ) -> Self {
        if stack.len() <= crate::arch::FRAME_WORDS {
            err::fatal(FatalError::StackTooSmall);
        }
        let stack_base = stack.as_ptr() as usize;
        let stack_len = stack.len();
        let stack_top = crate::arch::prime_stack(stack, entry);
        Task {
            stack_top,
            stack_base,
            stack_len,
            identifier,
            base_priority: priority,
            priority,
            state: TaskState::Inactive,
            sleep_ms: 0,
            blocked_on: None,
            base_period_ms: 0,
            period_ms: 0,
            has_fully_ran: false,
            next: None,
            prev: None,
        }
    }

    /// Returns this task's current effective priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the priority this task was created with.
    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// Returns a reference to this task's current state, for inspection.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Returns the label the task was created with.
    pub fn identifier(&self) -> &'static str {
        self.identifier
    }
}

/// Clamps a requested priority into the range handed out to user tasks.
pub(crate) fn clamp_priority(requested: u8) -> Priority {
    Priority(requested.clamp(config::PRIORITY_HIGHEST, config::PRIORITY_LOWEST))
}

/// Return value for operations that can have scheduling implications. This is
/// marked `must_use` because forgetting to actually request a context switch
/// after performing an operation that requires one would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// It's fine to keep running whatever task we were just running.
    Same,
    /// The set of runnable tasks changed in a way that demands a trip through
    /// the scheduler.
    Other,
}

impl NextTask {
    pub fn combine(self, other: Self) -> Self {
        if self == NextTask::Other || other == NextTask::Other {
            NextTask::Other
        } else {
            NextTask::Same
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_clamping() {
        assert_eq!(clamp_priority(0).0, config::PRIORITY_HIGHEST);
        assert_eq!(clamp_priority(7).0, 7);
        assert_eq!(clamp_priority(255).0, config::PRIORITY_LOWEST);
    }

    #[test]
    fn next_task_combine() {
        use NextTask::*;
        assert_eq!(Same.combine(Same), Same);
        assert_eq!(Same.combine(Other), Other);
        assert_eq!(Other.combine(Same), Other);
        assert_eq!(Other.combine(Other), Other);
    }
}
