// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and application code.

#![no_std]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Indicates priority of a task.
///
/// Priorities are small numbers; numerically lower priorities are more
/// important, so priority 1 is the most likely to be scheduled, followed by 2,
/// and so forth. (This keeps our logic simpler given that the number of
/// priorities can be reconfigured.)
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`, to
/// keep us from confusing ourselves on whether `>` means numerically greater /
/// less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Default,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Checks if `self` is at least as important as `other`.
    pub fn is_at_least_as_important_as(self, other: Self) -> bool {
        self.0 <= other.0
    }
}

/// Names a slot in the kernel's task table.
///
/// Task storage is allocated once at build configuration time, so a `TaskId`
/// is simply a small index that is valid for the life of the system.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct TaskId(pub u8);

impl TaskId {
    /// Extracts this ID as a table index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Names a slot in the kernel's semaphore table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct SemId(pub u8);

impl SemId {
    /// Extracts this ID as a table index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Handle for an entry in the kernel's soft-timer table, returned at creation
/// and consumed by the destroy/stop operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct TimerId(pub u8);

impl TimerId {
    /// Extracts this ID as a table index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// State used to make status and scheduling decisions for a task.
///
/// Except for the idle task, which is special-cased by the scheduler, a task's
/// state always names the membership list it currently occupies: `Ready` and
/// `Blocked` tasks sit in the priority-ordered ready/blocked lists, `Asleep`
/// tasks in the (unordered) sleep list. `Inactive` tasks are in no list at
/// all; this covers unused task slots and periodic tasks waiting for their
/// next release.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum TaskState {
    /// Task could be scheduled on the CPU.
    Ready,
    /// Task is parked until its sleep counter drains.
    Asleep,
    /// Task is waiting on a semaphore.
    Blocked,
    /// Task is not eligible for scheduling and belongs to no list.
    #[default]
    Inactive,
}

/// Flavor of a counting semaphore.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SemKind {
    /// Ownership-tracking lock: starts available (value 1), records its
    /// holder, and participates in priority inheritance.
    Mutex,
    /// Binary signalling flag: starts empty (value 0), has no owner, and
    /// never touches priorities.
    Flag,
}
