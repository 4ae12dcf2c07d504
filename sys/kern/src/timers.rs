// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The soft-timer table: fixed-capacity periodic events derived from the
//! hardware tick.
//!
//! Each live entry either invokes a callback or signals a semaphore when its
//! period elapses. Callbacks run from tick context, inside the critical
//! section: they must be bounded and non-blocking, and the only kernel
//! operation they may perform is signalling a semaphore. Anything longer
//! belongs in a task woken by a periodic signal instead.

use abi::{SemId, TimerId};

use crate::config;
use crate::err::TimerError;
use crate::kernel::Kernel;

/// What a timer does when it fires.
#[derive(Copy, Clone, Debug)]
pub enum TimerAction {
    /// Call this from tick context. Bounded and non-blocking, see above.
    Callback(fn()),
    /// Signal this semaphore, which may unblock a waiter and request a
    /// reschedule through the normal signal path.
    Signal(SemId),
}

/// One slot of the timer table. A slot with no action is free.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TimerSlot {
    period_ms: u32,
    remaining_ms: u32,
    action: Option<TimerAction>,
}

impl TimerSlot {
    pub(crate) const VACANT: TimerSlot = TimerSlot {
        period_ms: 0,
        remaining_ms: 0,
        action: None,
    };

    /// Ages this slot by one tick. Returns the action to perform if the
    /// period just elapsed; the slot reloads for the next round.
    pub(crate) fn advance(&mut self) -> Option<TimerAction> {
        let action = self.action?;
        if self.remaining_ms <= config::TICK_MS {
            self.remaining_ms = self.period_ms;
            Some(action)
        } else {
            self.remaining_ms -= config::TICK_MS;
            None
        }
    }
}

impl Kernel {
    /// Registers `callback` to run every `period_ms` milliseconds from tick
    /// context. See the module docs for what a callback is allowed to do.
    pub fn timer_create(
        &mut self,
        callback: fn(),
        period_ms: u32,
    ) -> Result<TimerId, TimerError> {
        self.install_timer(TimerAction::Callback(callback), period_ms)
    }

    /// Releases the slot behind `id`. An in-flight firing completes first.
    pub fn timer_destroy(&mut self, id: TimerId) -> Result<(), TimerError> {
        self.release_timer(id)
    }

    /// Arranges for `sem` to be signalled every `period_ms` milliseconds.
    pub fn periodic_signal_start(
        &mut self,
        sem: SemId,
        period_ms: u32,
    ) -> Result<TimerId, TimerError> {
        self.install_timer(TimerAction::Signal(sem), period_ms)
    }

    /// Stops the periodic signal behind `id`.
    pub fn periodic_signal_stop(&mut self, id: TimerId) -> Result<(), TimerError> {
        self.release_timer(id)
    }

    fn install_timer(
        &mut self,
        action: TimerAction,
        period_ms: u32,
    ) -> Result<TimerId, TimerError> {
        for (i, slot) in self.timers.iter_mut().enumerate() {
            if slot.action.is_none() {
                *slot = TimerSlot {
                    period_ms,
                    remaining_ms: period_ms,
                    action: Some(action),
                };
                return Ok(TimerId(i as u8));
            }
        }
        Err(TimerError::TableFull)
    }

    fn release_timer(&mut self, id: TimerId) -> Result<(), TimerError> {
        let slot = self
            .timers
            .get_mut(id.index())
            .filter(|s| s.action.is_some())
            .ok_or(TimerError::InvalidHandle)?;
        *slot = TimerSlot::VACANT;
        Ok(())
    }
}
