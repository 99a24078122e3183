// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minnow kernel.
//!
//! This is a small preemptive real-time kernel for single-core
//! microcontrollers without an MMU. It multiplexes a fixed pool of threads
//! over one CPU, mediates privileged operations through a trap-based
//! system-call interface, and provides priority scheduling, a kernel heap,
//! message boxes, and user-installable interrupt handlers.
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. Static configuration. The system takes a single shape specified at
//!    compile time: the TCB pool, the priority count, the heap and stack
//!    arenas, and the message-box set are all fixed constants.
//! 2. One owner for all kernel state. Everything a kernel of this kind
//!    would usually keep in file-scope globals lives in a single [`Kernel`]
//!    value, and every primitive takes it by exclusive reference. The
//!    interrupt entry is the unique holder.
//! 3. Indices, not pointers. Ready queues link TCBs by table index; the heap
//!    free lists and in-flight message envelopes are arena byte offsets. The
//!    only raw pointers are the payload pointers the kernel hands across the
//!    message boundary without ever dereferencing them.
//! 4. A narrow port boundary. Everything architecture- or board-specific --
//!    the console, the soft-vector table, the initial stack frame, the
//!    dispatch into a restored context -- sits behind the [`Port`] trait, and
//!    the rest of the kernel is portable. The hosted port runs the whole
//!    kernel on a development machine, which is how the test suite works.

#![cfg_attr(not(test), no_std)]

pub mod fail;
pub mod heap;
pub mod interrupt;
pub mod msgbox;
pub mod port;
pub mod startup;
pub mod syscalls;
pub mod thread;

pub use crate::interrupt::Handler;
pub use crate::port::{Context, Port};
pub use crate::startup::Kernel;
pub use crate::syscalls::{Reply, Syscall, ThreadEntry};

/// Number of slots in the TCB pool, and therefore the maximum number of live
/// threads. Slots are recycled when a thread exits.
pub const THREAD_NUM: usize = 6;

// TCB indices travel as u16 handles.
static_assertions::const_assert!(THREAD_NUM <= u16::MAX as usize);

#[cfg(test)]
pub(crate) mod testing;
