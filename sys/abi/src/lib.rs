// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and application threads.
//!
//! Types in this crate cross the system-call boundary: thread handles,
//! priorities, soft-vector and message-box identifiers, and the recoverable
//! error codes a primitive can hand back. Nothing in here depends on kernel
//! internals, so user-side code can link against this crate alone.

#![cfg_attr(not(test), no_std)]

use static_assertions::const_assert;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of scheduling priorities. Priority 0 is the most important and runs
/// with interrupts masked; `PRIORITY_NUM - 1` is the conventional idle
/// priority.
pub const PRIORITY_NUM: usize = 16;

// Priorities are carried in a u8.
const_assert!(PRIORITY_NUM <= u8::MAX as usize + 1);

/// Maximum length of a thread name, not counting the terminator byte in the
/// TCB's fixed buffer. Longer names are truncated at creation.
pub const THREAD_NAME_SIZE: usize = 15;

/// Names a thread: its index in the kernel's fixed TCB table.
///
/// Handles are not generation-tracked. A handle to a thread that has since
/// exited names whatever occupies that table slot now, which is the owner's
/// problem, not the kernel's.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThreadId(pub u16);

impl ThreadId {
    /// Extracts the TCB table index this handle names.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// A thread's scheduling priority: which of the ready queues it lives on.
///
/// The scheduler scans queues from index 0 upward and runs the first
/// non-empty one, so a *smaller* number means the thread goes *sooner*.
/// Zero is special beyond that: priority-0 threads execute with interrupts
/// masked. The largest index is where the idle thread parks itself.
///
/// Because "smaller wins" reads backwards, there is no `Ord` on this type;
/// comparisons go through [`Priority::is_more_important_than`], which says
/// what it means.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// The most important priority. Threads here run with interrupts masked.
    pub const HIGHEST: Self = Self(0);

    /// The least important priority, conventionally used by the idle thread.
    pub const LOWEST: Self = Self((PRIORITY_NUM - 1) as u8);

    /// True when a ready thread at `self` would be scheduled ahead of one
    /// at `other`. Equal priorities defer to queue (FIFO) order instead.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Whether threads at this priority run with interrupts masked. Only
    /// priority 0 does.
    pub fn masks_interrupts(self) -> bool {
        self.0 == 0
    }

    /// Whether this value names one of the configured priority levels.
    pub fn is_valid(self) -> bool {
        usize::from(self.0) < PRIORITY_NUM
    }

    /// This priority as a ready-queue index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

bitflags::bitflags! {
    /// Per-thread state bits kept in the TCB.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct ThreadFlags: u32 {
        /// The thread is linked into the ready queue for its priority. Clear
        /// while the thread is blocked (sleeping or parked in receive) and
        /// during the window where the system-call dispatcher has unlinked
        /// its caller.
        const READY = 1 << 0;
    }
}

/// Software interrupt vectors. Each names one slot in the kernel's handler
/// registry and one entry in the low-level soft-vector table that the port
/// maintains.
///
/// `SoftErr` and `Syscall` are claimed by the kernel at boot; the rest are
/// available to drivers via `setintr`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum SoftVec {
    /// CPU-detected software error (illegal instruction and friends). The
    /// kernel's reserved handler destroys the offending thread.
    SoftErr = 0,
    /// System-call trap.
    Syscall = 1,
    /// Serial interrupt, for a console driver to claim.
    SerIntr = 2,
}

impl SoftVec {
    /// Number of soft-vector slots.
    pub const COUNT: usize = 3;

    /// This vector as a handler-registry index.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Message box identifiers. The set is fixed at compile time; boxes are
/// created by the kernel at boot and live forever.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum MsgBoxId {
    /// Console input, filled by the serial interrupt handler.
    ConsInput = 0,
    /// Console output, drained by the console driver thread.
    ConsOutput = 1,
}

impl MsgBoxId {
    /// Number of message boxes.
    pub const COUNT: usize = 2;

    /// This box as a table index.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Recoverable failures a primitive can report through the caller's result
/// slot. Everything else the kernel considers fatal and handles itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Every TCB in the fixed pool is in use.
    OutOfThreads,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_zero_is_most_important() {
        assert!(Priority::HIGHEST.is_more_important_than(Priority::LOWEST));
        assert!(Priority(1).is_more_important_than(Priority(8)));
        assert!(!Priority(8).is_more_important_than(Priority(8)));
        assert!(!Priority(8).is_more_important_than(Priority(1)));
    }

    #[test]
    fn only_priority_zero_masks_interrupts() {
        assert!(Priority::HIGHEST.masks_interrupts());
        for p in 1..PRIORITY_NUM {
            assert!(!Priority(p as u8).masks_interrupts());
        }
    }

    #[test]
    fn priority_validity_tracks_configured_range() {
        assert!(Priority::LOWEST.is_valid());
        assert!(!Priority(PRIORITY_NUM as u8).is_valid());
    }

    #[test]
    fn vector_and_box_indices_are_dense() {
        assert_eq!(SoftVec::SoftErr.index(), 0);
        assert_eq!(SoftVec::Syscall.index(), 1);
        assert_eq!(SoftVec::SerIntr.index(), 2);
        assert!(SoftVec::SerIntr.index() < SoftVec::COUNT);
        assert_eq!(MsgBoxId::ConsInput.index(), 0);
        assert_eq!(MsgBoxId::ConsOutput.index(), 1);
        assert!(MsgBoxId::ConsOutput.index() < MsgBoxId::COUNT);
    }
}
