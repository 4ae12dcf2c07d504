// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task membership lists.
//!
//! The ready, sleep, and blocked lists share this one implementation: a
//! doubly-linked list threaded through the `next`/`prev` fields of the task
//! table, holding only a head and a tail itself. Because tasks are named by
//! table index, a `List` is two small `Option`s and the links never alias.
//!
//! A task may be on at most one list at a time; that invariant belongs to the
//! caller, which also supplies the task table to every operation. All list
//! mutation happens inside a critical section.

use abi::TaskId;

use crate::task::Task;

/// Head and tail of one membership list.
#[derive(Debug)]
pub(crate) struct List {
    head: Option<TaskId>,
    tail: Option<TaskId>,
}

impl List {
    pub(crate) const fn new() -> Self {
        List {
            head: None,
            tail: None,
        }
    }

    /// First task on the list, if any. For the priority-ordered lists this is
    /// the most important, longest-waiting member.
    pub(crate) fn head(&self) -> Option<TaskId> {
        self.head
    }

    /// Appends `id` at the tail, disregarding priority. Used by the sleep
    /// list, which is unordered.
    pub(crate) fn push_back(&mut self, tasks: &mut [Task], id: TaskId) {
        match self.tail {
            None => {
                tasks[id.index()].prev = None;
                tasks[id.index()].next = None;
                self.head = Some(id);
                self.tail = Some(id);
            }
            Some(old_tail) => {
                tasks[old_tail.index()].next = Some(id);
                tasks[id.index()].prev = Some(old_tail);
                tasks[id.index()].next = None;
                self.tail = Some(id);
            }
        }
    }

    /// Inserts `id` in priority order: after every member at least as
    /// important as it, before the first strictly less important one. Equal
    /// priorities therefore keep FIFO order, which is what round-robin
    /// fairness and waiter selection rely on.
    pub(crate) fn insert_by_priority(&mut self, tasks: &mut [Task], id: TaskId) {
        let priority = tasks[id.index()].priority;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if priority.is_more_important_than(tasks[c.index()].priority) {
                break;
            }
            cursor = tasks[c.index()].next;
        }
        match cursor {
            None => self.push_back(tasks, id),
            Some(before) => {
                let prev = tasks[before.index()].prev;
                tasks[id.index()].next = Some(before);
                tasks[id.index()].prev = prev;
                tasks[before.index()].prev = Some(id);
                match prev {
                    None => self.head = Some(id),
                    Some(p) => tasks[p.index()].next = Some(id),
                }
            }
        }
    }

    /// Unlinks `id`, which must be a member of this list.
    pub(crate) fn remove(&mut self, tasks: &mut [Task], id: TaskId) {
        let prev = tasks[id.index()].prev;
        let next = tasks[id.index()].next;
        tasks[id.index()].prev = None;
        tasks[id.index()].next = None;

        match prev {
            None => self.head = next,
            Some(p) => tasks[p.index()].next = next,
        }
        match next {
            None => self.tail = prev,
            Some(n) => tasks[n.index()].prev = prev,
        }
    }

    /// Collects the members in list order. Test support.
    #[cfg(test)]
    pub(crate) fn ids(&self, tasks: &[Task]) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut cursor = self.head;
        while let Some(c) = cursor {
            out.push(c);
            cursor = tasks[c.index()].next;
        }
        out
    }
}
