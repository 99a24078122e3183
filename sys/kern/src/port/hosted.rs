// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted reference port.
//!
//! Runs the kernel on a development machine with no hardware underneath:
//! console output is captured into a buffer, soft-vector registration is
//! bookkeeping, and dispatch records the context it would have resumed. The
//! test suite drives the kernel through this port; "interrupts" are calls to
//! `interrupt_entry`, and "running a thread" is issuing syscalls while that
//! thread is current.
//!
//! The initial stack frame follows the reference layout, low address first:
//! seven general registers (the first carrying the thread handle), the
//! program-counter word with the status bits in the top byte, and the
//! link word holding the exit trampoline.

use core::fmt::Write;
use core::mem::size_of;

use abi::{SoftVec, ThreadId};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::fail::{self, uassert};
use crate::port::{Context, Port};

/// Interrupt-mask bits ORed into the program-counter word of a thread that
/// must start with interrupts disabled: the status byte rides in the top
/// eight bits.
pub const PSW_INTR_MASK: u32 = 0xc0 << 24;

/// Pseudo-address of the startup trampoline, which calls the thread's entry
/// function. The hosted port never jumps anywhere, so this only needs to be
/// recognizable in a frame.
pub const STARTUP_TRAMPOLINE: u32 = 0xffc0;

/// Pseudo-address of the exit trampoline, which issues `exit` when the entry
/// function returns.
pub const EXIT_TRAMPOLINE: u32 = 0xffc4;

/// The crafted frame a fresh thread's first dispatch restores.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct InitFrame {
    /// General registers, in pop order. `regs[0]` is the argument register
    /// and carries the thread handle for the startup trampoline; the rest
    /// start zeroed.
    pub regs: [u32; 7],
    /// Program-counter word: trampoline address, with the program status
    /// byte (interrupt mask included) in the top eight bits.
    pub pc: u32,
    /// Address popped when the entry function returns.
    pub link: u32,
}

/// Capacity of the captured-console buffer.
const CONSOLE_CAP: usize = 4096;

/// How many dispatches the port remembers.
const DISPATCH_CAP: usize = 64;

#[derive(Default)]
pub struct HostedPort {
    console: heapless::String<CONSOLE_CAP>,
    registered: [bool; SoftVec::COUNT],
    dispatches: heapless::Vec<Context, DISPATCH_CAP>,
}

impl HostedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to the console so far.
    pub fn console(&self) -> &str {
        &self.console
    }

    pub fn clear_console(&mut self) {
        self.console.clear();
    }

    /// Whether the kernel has wired `vector` through `softvec_setintr`.
    pub fn vector_registered(&self, vector: SoftVec) -> bool {
        self.registered[vector.index()]
    }

    /// Contexts handed to `dispatch`, oldest first.
    pub fn dispatches(&self) -> &[Context] {
        &self.dispatches
    }

    pub fn last_dispatch(&self) -> Option<Context> {
        self.dispatches.last().copied()
    }
}

impl Port for HostedPort {
    fn puts(&mut self, s: &str) {
        let _ = self.console.push_str(s);
    }

    fn putxval(&mut self, value: u32, width: usize) {
        let _ = write!(self.console, "{:0>1$x}", value, width);
    }

    fn softvec_setintr(&mut self, vector: SoftVec) {
        self.registered[vector.index()] = true;
    }

    fn init_stack(
        &mut self,
        stack: &mut [u8],
        thread: ThreadId,
        interrupts_masked: bool,
    ) -> usize {
        uassert!(stack.len() >= size_of::<InitFrame>());
        let frame = InitFrame {
            regs: [u32::from(thread.0), 0, 0, 0, 0, 0, 0],
            pc: STARTUP_TRAMPOLINE
                | if interrupts_masked { PSW_INTR_MASK } else { 0 },
            link: EXIT_TRAMPOLINE,
        };
        let sp = stack.len() - size_of::<InitFrame>();
        frame
            .write_to(&mut stack[sp..])
            .unwrap_or_else(|_| fail::die("hosted: init frame write"));
        sp
    }

    fn dispatch(&mut self, context: &Context) {
        // Oldest records win if the log fills; tests never get close.
        let _ = self.dispatches.push(*context);
    }
}
