// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// In-kernel timestamp representation.
///
/// This is measured in ticks since boot (see `config::TICK_MS`). At one tick
/// per millisecond a `u64` outlives the hardware.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Moves this timestamp forward by one tick.
    pub(crate) fn advance(&mut self) {
        self.0 += 1;
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}
