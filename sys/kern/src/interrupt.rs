// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The common interrupt entry and the soft-vector handler registry.
//!
//! Every way into the kernel converges here. The low-level entry (wired per
//! vector through the port's soft-vector façade) has already saved the
//! interrupted thread's registers on its own stack; it hands us the vector
//! and the resulting stack pointer. We bank the stack pointer in the current
//! TCB, run whatever handler is installed for the vector, reschedule, and
//! dispatch the winner.
//!
//! Preemption falls out of this shape for free: an interrupt handler that
//! makes a more important thread READY (directly or via a service call)
//! doesn't need to do anything else, because the scheduler runs on every
//! interrupt exit.

use abi::SoftVec;

use crate::fail;
use crate::port::{klog, Port};
use crate::startup::Kernel;
use crate::thread::name_str;

/// An installed interrupt handler. Handlers run in interrupt context -- no
/// current thread, interrupts masked -- and talk to the kernel through
/// service calls.
pub type Handler<P> = fn(&mut Kernel<P>);

impl<P: Port> Kernel<P> {
    /// Common interrupt entry.
    ///
    /// `sp` is the interrupted thread's stack pointer after the low-level
    /// entry saved its registers, as a user-stack-arena offset.
    ///
    /// On hardware this never returns through its caller: the dispatch at
    /// the bottom resumes the selected thread. On the hosted port the
    /// dispatch is recorded and control comes back out, which is what lets
    /// tests drive the kernel through this function.
    pub fn interrupt_entry(&mut self, vector: SoftVec, sp: usize) {
        if let Some(cur) = self.current {
            let tcb = &mut self.threads[usize::from(cur)];
            // The saved frame must sit inside the interrupted thread's own
            // stack; stacks grow down from `stack`.
            fail::uassert!(sp <= tcb.stack);
            tcb.context.sp = sp;
        }

        if let Some(handler) = self.handlers[vector.index()] {
            handler(self);
        }

        self.schedule();
        let Some(cur) = self.current else {
            fail::die("scheduler finished without a thread")
        };
        let context = self.threads[usize::from(cur)].context;
        self.port.dispatch(&context);
    }

    /// Wires `vector` to the kernel through the port's soft-vector façade
    /// and records `handler` for it. (The `setintr` primitive, minus the
    /// caller requeue, which the dispatcher variant does.)
    pub(crate) fn set_interrupt(
        &mut self,
        vector: SoftVec,
        handler: Handler<P>,
    ) {
        self.port.softvec_setintr(vector);
        self.handlers[vector.index()] = Some(handler);
        klog!(self.port, "setintr vector {}", vector.index());
    }

    /// Reserved handler for the software-error vector: report the thread
    /// that trapped and destroy it. The kernel itself carries on.
    pub(crate) fn softerr_intr(kernel: &mut Kernel<P>) {
        let Some(cur) = kernel.current else {
            fail::die("software error with no current thread")
        };
        let name = kernel.threads[usize::from(cur)].name;
        kernel.port.puts(name_str(&name));
        kernel.port.puts(" DOWN.\n");
        kernel.take_current();
        kernel.exit_thread();
    }
}
