// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The port boundary: everything architecture- and board-specific the kernel
//! consumes, but does not implement.
//!
//! The kernel proper is portable. It manipulates TCBs, queues, and arenas,
//! and reaches through [`Port`] for the four things only a port can do:
//! write to the serial console, wire a soft-vector slot to the low-level
//! interrupt entry, lay down a thread's initial stack frame, and dispatch a
//! saved context by restoring it and returning from exception.
//!
//! The contract around dispatch deserves spelling out. On hardware,
//! `dispatch` does not return to its caller while the suspended thread stays
//! suspended -- it "returns" only in the sense that the thread it resumes
//! will eventually trap back into the kernel. The hosted port models that by
//! recording the context and returning immediately, as if the resumed thread
//! had run and trapped again.

use abi::{SoftVec, ThreadId};

/// Saved execution context of a suspended thread.
///
/// The general registers live on the thread's own stack, saved there by the
/// low-level trap entry, so the only thing the kernel has to hold is the
/// stack pointer -- kept as an offset into the user-stack arena so the value
/// survives the kernel being placed anywhere in memory.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Context {
    /// Saved stack pointer, as a byte offset into the user-stack arena.
    pub sp: usize,
}

/// Interface a port supplies to the kernel.
pub trait Port {
    /// Writes `s` to the serial console. The kernel uses this only for
    /// startup, exit, and panic messages.
    fn puts(&mut self, s: &str);

    /// Writes `value` to the serial console in hexadecimal, zero-padded to
    /// `width` digits. Part of the console interface alongside `puts`;
    /// port-level diagnostics use it even though the kernel core sticks to
    /// text.
    fn putxval(&mut self, value: u32, width: usize);

    /// Installs the kernel's common interrupt entry as the low-level
    /// dispatch target for `vector`. After this, an interrupt of that type
    /// must save the general registers on the interrupted stack and call
    /// [`crate::Kernel::interrupt_entry`] with the vector and the saved
    /// stack pointer.
    fn softvec_setintr(&mut self, vector: SoftVec);

    /// Builds the initial stack image for a new thread in `stack` (the
    /// thread's whole stack region; the frame goes at the high end) and
    /// returns the initial stack pointer as an offset into `stack`.
    ///
    /// The frame must arrange for the first dispatch to enter the startup
    /// trampoline with `thread` in the first argument register, all other
    /// registers zero, and the interrupt mask set iff `interrupts_masked`;
    /// and for a return from the entry function to land in the exit
    /// trampoline.
    fn init_stack(
        &mut self,
        stack: &mut [u8],
        thread: ThreadId,
        interrupts_masked: bool,
    ) -> usize;

    /// Resumes `context`: loads its stack pointer, pops the saved registers,
    /// and returns from exception into the selected thread. See the module
    /// docs for what "returns" means here.
    fn dispatch(&mut self, context: &Context);
}

/// Trace logging through the port console, enabled by the `klog` feature.
/// Compiles to nothing otherwise.
#[cfg(feature = "klog")]
macro_rules! klog {
    ($port:expr, $($rest:tt)*) => {
        $crate::port::klog_write(&mut $port, core::format_args!($($rest)*))
    };
}
#[cfg(not(feature = "klog"))]
macro_rules! klog {
    ($port:expr, $($rest:tt)*) => {{
        let _ = &mut $port;
    }};
}
pub(crate) use klog;

#[cfg(feature = "klog")]
pub fn klog_write<P: Port>(port: &mut P, args: core::fmt::Arguments<'_>) {
    use core::fmt::Write;

    struct ConsoleWriter<'a, P: Port>(&'a mut P);

    impl<P: Port> Write for ConsoleWriter<'_, P> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            self.0.puts(s);
            Ok(())
        }
    }

    let mut w = ConsoleWriter(port);
    let _ = w.write_fmt(args);
    port.puts("\n");
}

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;
