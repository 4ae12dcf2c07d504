// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel state and its core operations: task creation, scheduling, the
//! tick service, and timed sleep.
//!
//! All mutable kernel state lives in one [`Kernel`] value. On a target the
//! single instance is installed by `startup::init` and reached through
//! `startup::with_kernel` from inside a critical section; the test suite
//! builds throwaway instances and calls the methods directly. Methods never
//! touch the interrupt hardware themselves — operations with scheduling
//! consequences return a [`NextTask`] hint and the caller decides whether to
//! request a context switch.

use abi::{TaskId, TaskState};
use heapless::Vec;

use crate::config::{self, StackElement};
use crate::err::{self, FatalError};
use crate::list::List;
use crate::sema::Semaphore;
use crate::task::{self, NextTask, Task, TaskEntry};
use crate::time::Timestamp;
use crate::timers::{TimerAction, TimerSlot};

/// The idle task lives in slot 0 of the task table; user tasks fill the
/// remaining slots in creation order.
pub(crate) const IDLE: TaskId = TaskId(0);

/// All kernel state. The sole mutable authority over tasks, lists,
/// semaphores, and timers; anything that mutates it must hold the critical
/// section.
pub struct Kernel {
    pub(crate) tasks: [Task; config::NUM_TASKS],
    /// Number of user task slots handed out so far.
    pub(crate) user_tasks: usize,
    /// The running (or about-to-run) task. Updated only by `schedule`, and by
    /// initialization.
    pub(crate) current: TaskId,
    pub(crate) ready: List,
    pub(crate) sleeping: List,
    pub(crate) blocked: List,
    /// Periodic tasks, release-eligible or not. Never removed.
    pub(crate) periodic: Vec<TaskId, { config::NUM_USER_TASKS }>,
    pub(crate) sems: Vec<Semaphore, { config::NUM_SEMAPHORES }>,
    pub(crate) timers: [TimerSlot; config::NUM_SOFT_TIMERS],
    /// Ticks since boot.
    pub(crate) time: Timestamp,
    /// Ticks since the tick service last requested a dispatch; drives the
    /// time-slice check.
    pub(crate) ticks_since_dispatch: u32,
}

impl Kernel {
    /// Builds a kernel whose idle task runs `idle_entry` on `idle_stack`.
    ///
    /// The idle task takes slot 0 with a priority strictly below the user
    /// range. It is never inserted into the ready list; the scheduler falls
    /// back to it when nothing else is runnable.
    pub fn new(idle_entry: TaskEntry, idle_stack: &'static mut [StackElement]) -> Self {
        let mut tasks = [Task::EMPTY; config::NUM_TASKS];
        tasks[IDLE.index()] = Task::new(
            idle_entry,
            idle_stack,
            abi::Priority(config::PRIORITY_IDLE),
            "idle",
        );
        Kernel {
            tasks,
            user_tasks: 0,
            current: IDLE,
            ready: List::new(),
            sleeping: List::new(),
            blocked: List::new(),
            periodic: Vec::new(),
            sems: Vec::new(),
            timers: [TimerSlot::VACANT; config::NUM_SOFT_TIMERS],
            time: Timestamp::default(),
            ticks_since_dispatch: 0,
        }
    }

    /// Creates an aperiodic task and inserts it into the ready list.
    ///
    /// `priority` is clamped into the user range. The returned hint is
    /// `Other` when the new task is more important than the running one.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        stack: &'static mut [StackElement],
        priority: u8,
        identifier: &'static str,
    ) -> (TaskId, NextTask) {
        let id = self.alloc_task(entry, stack, priority, identifier);
        self.tasks[id.index()].state = TaskState::Ready;
        self.ready.insert_by_priority(&mut self.tasks, id);
        let hint = if self.preempts_current(id) {
            NextTask::Other
        } else {
            NextTask::Same
        };
        (id, hint)
    }

    /// Creates a periodic task released every `period_ms` by the tick
    /// service.
    ///
    /// The task is registered in the periodic table but joins the ready list
    /// only at each release; it starts eligible, so its first release comes
    /// one full period after creation.
    pub fn create_periodic_task(
        &mut self,
        entry: TaskEntry,
        stack: &'static mut [StackElement],
        priority: u8,
        period_ms: u32,
        identifier: &'static str,
    ) -> TaskId {
        uassert!(period_ms > 0);
        let id = self.alloc_task(entry, stack, priority, identifier);
        let t = &mut self.tasks[id.index()];
        t.base_period_ms = period_ms;
        t.period_ms = period_ms;
        t.has_fully_ran = true;
        // The registry is sized to the task table, so this cannot fail.
        uassert!(self.periodic.push(id).is_ok());
        id
    }

    fn alloc_task(
        &mut self,
        entry: TaskEntry,
        stack: &'static mut [StackElement],
        priority: u8,
        identifier: &'static str,
    ) -> TaskId {
        if self.user_tasks == config::NUM_USER_TASKS {
            err::fatal(FatalError::TaskCapacity);
        }
        let id = TaskId((1 + self.user_tasks) as u8);
        self.user_tasks += 1;
        self.tasks[id.index()] =
            Task::new(entry, stack, task::clamp_priority(priority), identifier);
        id
    }

    /// Picks the next task to run and records it as current. The actual
    /// register-window switch is the context-switch handler's business.
    ///
    /// The head of the ready list wins, except that when the running task is
    /// still in the list and its successor ties the head's priority, the
    /// successor wins — that is how round-robin rotates through an
    /// equal-priority band on each reschedule. An empty ready list selects
    /// the idle task.
    pub fn schedule(&mut self) {
        let Some(head) = self.ready.head() else {
            self.current = IDLE;
            return;
        };
        let mut next = head;
        let cur = &self.tasks[self.current.index()];
        if cur.state == TaskState::Ready {
            if let Some(succ) = cur.next {
                if self.tasks[succ.index()].priority == self.tasks[head.index()].priority {
                    next = succ;
                }
            }
        }
        self.current = next;
    }

    /// The tick service, run on every hardware tick from the tick interrupt,
    /// inside the critical section.
    ///
    /// Ages sleeping tasks, releases periodic tasks whose period expired,
    /// drives the soft-timer table, and accounts the running task's time
    /// slice. Returns `Other` when a context switch should be requested:
    /// either the slice is used up or something more important than the
    /// running task became ready.
    pub fn tick(&mut self) -> NextTask {
        self.time.advance();
        self.ticks_since_dispatch += 1;
        let mut sched = NextTask::Same;

        // Sleepers. Waking a task rewrites its links, so the successor is
        // captured before the move.
        let mut cursor = self.sleeping.head();
        while let Some(id) = cursor {
            cursor = self.tasks[id.index()].next;
            let t = &mut self.tasks[id.index()];
            if t.sleep_ms <= config::TICK_MS {
                t.sleep_ms = 0;
                t.state = TaskState::Ready;
                self.sleeping.remove(&mut self.tasks, id);
                self.ready.insert_by_priority(&mut self.tasks, id);
                if self.preempts_current(id) {
                    sched = NextTask::Other;
                }
            } else {
                t.sleep_ms -= config::TICK_MS;
            }
        }

        // Periodic releases. An instance that overran its period (still
        // running, `has_fully_ran` clear) is skipped; its period resets and
        // it is next considered at the following boundary.
        for i in 0..self.periodic.len() {
            let id = self.periodic[i];
            let t = &mut self.tasks[id.index()];
            if t.period_ms <= config::TICK_MS {
                t.period_ms = t.base_period_ms;
                if t.has_fully_ran {
                    t.has_fully_ran = false;
                    t.state = TaskState::Ready;
                    self.ready.insert_by_priority(&mut self.tasks, id);
                    if self.preempts_current(id) {
                        sched = NextTask::Other;
                    }
                }
            } else {
                t.period_ms -= config::TICK_MS;
            }
        }

        // Soft timers. Callbacks run right here in tick context; signalled
        // semaphores may unblock a waiter, which folds into the hint.
        for i in 0..config::NUM_SOFT_TIMERS {
            match self.timers[i].advance() {
                None => (),
                Some(TimerAction::Callback(f)) => f(),
                Some(TimerAction::Signal(sid)) => {
                    sched = sched.combine(self.sem_signal(sid));
                }
            }
        }

        if sched == NextTask::Other
            || self.ticks_since_dispatch * config::TICK_MS >= config::TIME_SLICE_MS
        {
            self.ticks_since_dispatch = 0;
            return NextTask::Other;
        }
        NextTask::Same
    }

    /// Parks the running task for at least `ms` milliseconds. The wake-up is
    /// tick-driven, so actual sleep time is rounded up to the next tick
    /// boundary; `sleep(0)` still passes through the sleep list for one tick.
    ///
    /// The returned hint is always `Other` — the caller must follow up with a
    /// context-switch request once outside the critical section.
    pub fn sleep(&mut self, ms: u32) -> NextTask {
        let cur = self.current;
        uassert!(cur != IDLE);
        let t = &mut self.tasks[cur.index()];
        t.sleep_ms = ms;
        t.state = TaskState::Asleep;
        self.ready.remove(&mut self.tasks, cur);
        self.sleeping.push_back(&mut self.tasks, cur);
        NextTask::Other
    }

    /// Voluntary end of the running task's current release.
    ///
    /// A periodic task leaves the ready list until the tick service
    /// re-releases it. For an aperiodic task this is a plain yield: it stays
    /// ready and the reschedule just rotates within its priority band.
    pub fn relinquish(&mut self) -> NextTask {
        let cur = self.current;
        if self.tasks[cur.index()].base_period_ms != 0 {
            let t = &mut self.tasks[cur.index()];
            t.has_fully_ran = true;
            t.state = TaskState::Inactive;
            self.ready.remove(&mut self.tasks, cur);
        }
        NextTask::Other
    }

    /// Ticks since boot.
    pub fn tick_count(&self) -> Timestamp {
        self.time
    }

    /// The running (or about-to-run) task.
    pub fn current(&self) -> TaskId {
        self.current
    }

    /// Read access to a task, for inspection.
    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    /// Looks a task up by the label given at creation. Diagnostics and tests
    /// only — labels are not required to be unique and this is a linear scan.
    pub fn find_task(&self, identifier: &str) -> Option<TaskId> {
        (0..=self.user_tasks)
            .map(|i| TaskId(i as u8))
            .find(|id| self.tasks[id.index()].identifier == identifier)
    }

    /// Pointer to the current task's control block, for the context-switch
    /// plumbing.
    pub fn current_task_ptr(&mut self) -> *mut Task {
        &mut self.tasks[self.current.index()]
    }

    /// Does `id` outrank the running task?
    pub(crate) fn preempts_current(&self, id: TaskId) -> bool {
        self.tasks[id.index()]
            .priority
            .is_more_important_than(self.tasks[self.current.index()].priority)
    }

    /// Re-sorts `id` into its current membership list after a priority
    /// change. The sleep list is unordered, so only ready/blocked members
    /// actually move.
    pub(crate) fn reposition(&mut self, id: TaskId) {
        match self.tasks[id.index()].state {
            TaskState::Ready => {
                self.ready.remove(&mut self.tasks, id);
                self.ready.insert_by_priority(&mut self.tasks, id);
            }
            TaskState::Blocked => {
                self.blocked.remove(&mut self.tasks, id);
                self.blocked.insert_by_priority(&mut self.tasks, id);
            }
            TaskState::Asleep | TaskState::Inactive => (),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_current(&mut self, id: TaskId) {
        self.current = id;
    }

    /// Asserts the structural invariants that must hold between any two
    /// kernel operations. Test support.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let ready = self.ready.ids(&self.tasks);
        let sleeping = self.sleeping.ids(&self.tasks);
        let blocked = self.blocked.ids(&self.tasks);

        // The idle task belongs to no list.
        for list in [&ready, &sleeping, &blocked] {
            assert!(!list.contains(&IDLE));
        }

        // Each created task is in exactly the list its state names.
        for i in 1..=self.user_tasks {
            let id = TaskId(i as u8);
            let t = &self.tasks[id.index()];
            let memberships = [
                (TaskState::Ready, &ready),
                (TaskState::Asleep, &sleeping),
                (TaskState::Blocked, &blocked),
            ];
            for (state, list) in memberships {
                let expected = if t.state == state { 1 } else { 0 };
                assert_eq!(
                    list.iter().filter(|&&x| x == id).count(),
                    expected,
                    "task {:?} state {:?}",
                    id,
                    t.state
                );
            }
            // Effective priority is never less important than the base.
            assert!(t.priority.0 <= t.base_priority.0);
        }

        // Ready and blocked lists stay sorted, most important first.
        for list in [&ready, &blocked] {
            for pair in list.windows(2) {
                assert!(
                    self.tasks[pair[0].index()].priority.0
                        <= self.tasks[pair[1].index()].priority.0
                );
            }
        }

        // A semaphore's debt matches its waiters.
        for (i, sem) in self.sems.iter().enumerate() {
            let waiters = blocked
                .iter()
                .filter(|id| {
                    self.tasks[id.index()].blocked_on == Some(abi::SemId(i as u8))
                })
                .count();
            assert_eq!((-sem.value).max(0) as usize, waiters);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn idle_entry() -> ! {
        unreachable!("test tasks are never dispatched")
    }

    pub(crate) fn stack(words: usize) -> &'static mut [StackElement] {
        Box::leak(vec![0; words].into_boxed_slice())
    }

    /// A kernel with an idle task and nothing else.
    pub(crate) fn kernel() -> Kernel {
        Kernel::new(idle_entry, stack(64))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::{TICK_MS, TIME_SLICE_MS};

    fn spawn(k: &mut Kernel, priority: u8, label: &'static str) -> TaskId {
        let (id, _) = k.create_task(idle_entry, stack(64), priority, label);
        id
    }

    #[test]
    fn empty_ready_list_selects_idle() {
        let mut k = kernel();
        k.schedule();
        assert_eq!(k.current(), IDLE);
        k.check_invariants();
    }

    #[test]
    fn highest_priority_wins() {
        let mut k = kernel();
        let _t1 = spawn(&mut k, 3, "t1");
        let t2 = spawn(&mut k, 1, "t2");
        let _t3 = spawn(&mut k, 2, "t3");
        k.schedule();
        assert_eq!(k.current(), t2);
        k.check_invariants();
    }

    #[test]
    fn round_robin_between_equals() {
        let mut k = kernel();
        let t1 = spawn(&mut k, 3, "t1");
        let t2 = spawn(&mut k, 3, "t2");

        k.set_current(t1);
        k.schedule();
        assert_eq!(k.current(), t2);
        k.schedule();
        assert_eq!(k.current(), t1);
    }

    #[test]
    fn round_robin_rotates_through_three() {
        let mut k = kernel();
        let t1 = spawn(&mut k, 3, "t1");
        let t2 = spawn(&mut k, 3, "t2");
        let t3 = spawn(&mut k, 3, "t3");

        k.set_current(t1);
        for expected in [t2, t3, t1, t2] {
            k.schedule();
            assert_eq!(k.current(), expected);
        }
    }

    #[test]
    fn creation_hints_preemption() {
        let mut k = kernel();
        let (_, hint) = k.create_task(idle_entry, stack(64), 5, "bg");
        // Anything outranks idle.
        assert_eq!(hint, NextTask::Other);

        k.schedule();
        let (_, hint) = k.create_task(idle_entry, stack(64), 9, "low");
        assert_eq!(hint, NextTask::Same);
        let (_, hint) = k.create_task(idle_entry, stack(64), 2, "hi");
        assert_eq!(hint, NextTask::Other);
    }

    #[test]
    #[should_panic(expected = "task table exhausted")]
    fn task_capacity_is_fatal() {
        let mut k = kernel();
        for _ in 0..=config::NUM_USER_TASKS {
            let _ = k.create_task(idle_entry, stack(64), 5, "t");
        }
    }

    #[test]
    #[should_panic(expected = "stack too small")]
    fn undersized_stack_is_fatal() {
        let mut k = kernel();
        let _ = k.create_task(idle_entry, stack(crate::arch::FRAME_WORDS), 5, "tiny");
    }

    #[test]
    fn sleep_expiry_preempts_lower_priority_task() {
        let mut k = kernel();
        let t1 = spawn(&mut k, 3, "t1");
        let t2 = spawn(&mut k, 1, "t2");

        k.schedule();
        assert_eq!(k.current(), t2);
        assert_eq!(k.sleep(10 * TICK_MS), NextTask::Other);
        k.schedule();
        assert_eq!(k.current(), t1);
        k.check_invariants();

        for _ in 0..9 {
            if k.tick() == NextTask::Other {
                // Time slice expiry; t1 is the only ready task.
                k.schedule();
            }
            assert_eq!(k.current(), t1);
        }
        // Tenth tick wakes t2, which outranks t1.
        assert_eq!(k.tick(), NextTask::Other);
        k.schedule();
        assert_eq!(k.current(), t2);
        assert_eq!(k.task(t2).state(), TaskState::Ready);
        assert_eq!(k.task(t2).sleep_ms, 0);
        k.check_invariants();
    }

    #[test]
    fn sleep_zero_still_sleeps_one_tick() {
        let mut k = kernel();
        let t1 = spawn(&mut k, 3, "t1");
        k.schedule();
        let _ = k.sleep(0);
        assert_eq!(k.task(t1).state(), TaskState::Asleep);
        k.check_invariants();
        let _ = k.tick();
        assert_eq!(k.task(t1).state(), TaskState::Ready);
        k.check_invariants();
    }

    #[test]
    fn time_slice_forces_reschedule() {
        let mut k = kernel();
        let _ = spawn(&mut k, 3, "t1");
        k.schedule();

        let slice_ticks = (TIME_SLICE_MS / TICK_MS) as usize;
        for _ in 0..slice_ticks - 1 {
            assert_eq!(k.tick(), NextTask::Same);
        }
        assert_eq!(k.tick(), NextTask::Other);
        // The accumulator restarts after the forced dispatch.
        assert_eq!(k.tick(), NextTask::Same);
    }

    #[test]
    fn periodic_task_releases_on_schedule() {
        let mut k = kernel();
        let a = spawn(&mut k, 3, "a");
        let p = k.create_periodic_task(idle_entry, stack(64), 1, 10 * TICK_MS, "p");
        assert_eq!(k.task(p).state(), TaskState::Inactive);
        k.schedule();
        assert_eq!(k.current(), a);

        for _ in 0..9 {
            if k.tick() == NextTask::Other {
                k.schedule();
            }
            assert_eq!(k.current(), a);
        }
        // Tenth tick releases p at priority 1.
        assert_eq!(k.tick(), NextTask::Other);
        k.schedule();
        assert_eq!(k.current(), p);
        assert_eq!(k.task(p).state(), TaskState::Ready);
        assert!(!k.task(p).has_fully_ran);
        k.check_invariants();

        // Finishing the release parks it until the next period boundary.
        assert_eq!(k.relinquish(), NextTask::Other);
        assert_eq!(k.task(p).state(), TaskState::Inactive);
        assert!(k.task(p).has_fully_ran);
        k.schedule();
        assert_eq!(k.current(), a);
        k.check_invariants();
    }

    #[test]
    fn overrunning_periodic_task_is_not_rereleased() {
        let mut k = kernel();
        let p = k.create_periodic_task(idle_entry, stack(64), 1, 2 * TICK_MS, "p");
        k.schedule();

        let _ = k.tick();
        let _ = k.tick(); // first release
        assert_eq!(k.task(p).state(), TaskState::Ready);
        k.schedule();
        assert_eq!(k.current(), p);

        // p never relinquishes; the next boundary must not re-release it.
        let _ = k.tick();
        let _ = k.tick();
        let ready_count = k
            .ready
            .ids(&k.tasks)
            .iter()
            .filter(|&&x| x == p)
            .count();
        assert_eq!(ready_count, 1);
        k.check_invariants();
    }

    #[test]
    fn aperiodic_relinquish_is_a_yield() {
        let mut k = kernel();
        let t1 = spawn(&mut k, 3, "t1");
        let t2 = spawn(&mut k, 3, "t2");
        k.set_current(t1);
        assert_eq!(k.relinquish(), NextTask::Other);
        assert_eq!(k.task(t1).state(), TaskState::Ready);
        k.schedule();
        assert_eq!(k.current(), t2);
        k.check_invariants();
    }

    #[test]
    fn find_task_by_label() {
        let mut k = kernel();
        let t1 = spawn(&mut k, 3, "worker");
        assert_eq!(k.find_task("worker"), Some(t1));
        assert_eq!(k.find_task("idle"), Some(IDLE));
        assert_eq!(k.find_task("nope"), None);
    }

    #[test]
    fn tick_count_is_monotonic() {
        let mut k = kernel();
        assert_eq!(u64::from(k.tick_count()), 0);
        for _ in 0..7 {
            let _ = k.tick();
        }
        assert_eq!(u64::from(k.tick_count()), 7);
    }
}
