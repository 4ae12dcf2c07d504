// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel failures such that they can be found by
//! tooling.
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `fail::KERNEL_HAS_FAILED` is a `bool`. It is false until the kernel
//!   reaches [`die`] (explicitly or through a `panic!`). Any other value
//!   means the kernel either has not booted or has corrupted memory on the
//!   way down.
//!
//! - `fail::KERNEL_EPITAPH` is a byte array. `die` writes as much of the
//!   failure reason into it (as UTF-8) as fits, truncating beyond that; for
//!   printing, trim trailing NUL bytes.

use core::fmt::{Display, Write};
use core::sync::atomic::Ordering;

/// Flag that gets set to `true` by all failure reporting functions, giving
/// tools a one-stop shop for kernel triage.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

/// Up to `EPITAPH_LEN` bytes describing the event that took the kernel down,
/// padded with NULs.
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: this is the only site that touches the flag, zero or one times
    // in practice, never from a context where another kernel entry runs.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        // A recursive panic; writing a second epitaph would only destroy the
        // first. Park.
        loop {
            core::sync::atomic::fence(Ordering::SeqCst);
        }
    }

    // Safety: the flag above ensures only one execution reaches this.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Records `msg` for the debugger and parks the core.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: buf };
    write!(writer, "{msg}").ok();

    loop {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

struct Eulogist {
    dest: &'static mut [u8],
}

impl Write for Eulogist {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
