// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An overwriting circular buffer for producer/consumer traffic between
//! tasks (and interrupt-fed producers).
//!
//! The buffer favors fresh data: a write that doesn't fit evicts the oldest
//! unread elements, and elements that exceed the buffer's whole capacity are
//! counted in `missed` rather than stored. Readers can check `missed` to
//! learn how much of the stream they lost.
//!
//! [`Fifo`] is the pure data structure over caller-owned storage; it does no
//! locking and is safe to use from a single context. [`SyncFifo`] pairs one
//! with a kernel mutex — see the `api` wrappers for the task-facing
//! operations.

use abi::SemId;

/// Circular buffer over caller-owned storage.
#[derive(Debug)]
pub struct Fifo<'a, T> {
    data: &'a mut [T],
    read: usize,
    write: usize,
    space_remaining: usize,
    missed: usize,
    last_read_len: usize,
}

impl<'a, T: Copy> Fifo<'a, T> {
    /// Wraps `data` as an empty buffer. Its length is the buffer capacity.
    pub fn new(data: &'a mut [T]) -> Self {
        let space = data.len();
        Fifo {
            data,
            read: 0,
            write: 0,
            space_remaining: space,
            missed: 0,
            last_read_len: 0,
        }
    }

    /// Appends `src`, evicting the oldest unread elements on overfill.
    ///
    /// If `src` is longer than the whole buffer, only its freshest
    /// `capacity()` elements are stored and the excess is added to
    /// `missed()`. If it is longer than the free space, the oldest unread
    /// data is overwritten and the read position jumps forward to the oldest
    /// surviving element.
    pub fn write(&mut self, src: &[T]) {
        let cap = self.data.len();
        let n = src.len().min(cap);
        self.missed += src.len() - n;
        let src = &src[src.len() - n..];

        let overfill = n > self.space_remaining;
        self.space_remaining = if overfill {
            0
        } else {
            self.space_remaining - n
        };

        let first = n.min(cap - self.write);
        self.data[self.write..self.write + first].copy_from_slice(&src[..first]);
        let second = n - first;
        self.data[..second].copy_from_slice(&src[first..]);
        self.write = (self.write + n) % cap;

        if overfill {
            // Oldest surviving element is the one just past the write head.
            self.read = self.write;
        }
    }

    /// Copies up to `dst.len()` unread elements into `dst`, returning how
    /// many were copied. Also recorded in `last_read_len()`.
    pub fn read(&mut self, dst: &mut [T]) -> usize {
        let cap = self.data.len();
        let n = dst.len().min(self.len());

        let first = n.min(cap - self.read);
        dst[..first].copy_from_slice(&self.data[self.read..self.read + first]);
        let second = n - first;
        dst[first..n].copy_from_slice(&self.data[..second]);
        self.read = (self.read + n) % cap;

        self.space_remaining += n;
        self.last_read_len = n;
        n
    }

    /// Number of unread elements.
    pub fn len(&self) -> usize {
        self.data.len() - self.space_remaining
    }

    pub fn is_empty(&self) -> bool {
        self.space_remaining == self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Free elements before the next write starts evicting.
    pub fn space_remaining(&self) -> usize {
        self.space_remaining
    }

    /// Total elements lost to eviction-free truncation so far.
    pub fn missed(&self) -> usize {
        self.missed
    }

    /// Element count delivered by the most recent `read`.
    pub fn last_read_len(&self) -> usize {
        self.last_read_len
    }
}

/// A [`Fifo`] bound to a kernel mutex so multiple tasks can share it. Use
/// the `api::buffer_*` operations to access one; the accessors here read
/// single fields and are fine for diagnostics.
#[derive(Debug)]
pub struct SyncFifo<'a, T> {
    pub(crate) sem: SemId,
    pub(crate) fifo: Fifo<'a, T>,
}

impl<'a, T: Copy> SyncFifo<'a, T> {
    pub(crate) fn new(sem: SemId, data: &'a mut [T]) -> Self {
        SyncFifo {
            sem,
            fifo: Fifo::new(data),
        }
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub fn space_remaining(&self) -> usize {
        self.fifo.space_remaining()
    }

    pub fn missed(&self) -> usize {
        self.fifo.missed()
    }

    pub fn last_read_len(&self) -> usize {
        self.fifo.last_read_len()
    }
}
