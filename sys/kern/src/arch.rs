// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, tailored for the current target. Each support module
//! must define the same set of names: the critical-section primitives, the
//! context-switch request, initial-frame priming, first dispatch, and the
//! `klog!`/`uassert!` macros.
//!
//! Hosted builds (tests, development tooling) get `fake`, which stands in
//! for the interrupt hardware with thread-local state so kernel logic can be
//! exercised without a board.

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "none", target_arch = "arm"))] {
        #[macro_use]
        pub mod arm_m;
        pub use arm_m::*;
    } else if #[cfg(not(target_os = "none"))] {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    } else {
        compile_error!("support for this architecture not implemented");
    }
}
