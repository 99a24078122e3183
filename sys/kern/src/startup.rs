// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel value and the boot path.
//!
//! Everything the kernel mutates lives in one [`Kernel`] struct: the TCB
//! pool, the ready queues, the handler registry, the message boxes, the
//! heap, and the stack arena, plus the port it reaches hardware through.
//! Primitives take it by `&mut`, and on hardware the interrupt entry is the
//! single place that ever holds that reference -- the implicit critical
//! section of interrupt context stands in for locking.
//!
//! Internal bookkeeping is all indices and arena offsets, so the value can
//! be constructed anywhere and moved freely up until the first heap pointer
//! is handed out (`kmalloc`, or a payload crossing a message box). After
//! that it must stay put, which on a target it does: it's a static.

use abi::{MsgBoxId, Priority, SoftVec, ThreadId, PRIORITY_NUM};

use crate::fail;
use crate::heap::Heap;
use crate::interrupt::Handler;
use crate::msgbox::MsgBox;
use crate::port::Port;
use crate::syscalls::{Reply, ThreadEntry};
use crate::thread::{ReadyQueue, StackArena, Tcb};
use crate::THREAD_NUM;

pub struct Kernel<P: Port> {
    pub(crate) port: P,
    pub(crate) threads: [Tcb<P>; THREAD_NUM],
    pub(crate) readyque: [ReadyQueue; PRIORITY_NUM],
    /// The thread whose context is on the CPU. `None` only before boot
    /// finishes and while a service call runs in interrupt context.
    pub(crate) current: Option<u16>,
    pub(crate) handlers: [Option<Handler<P>>; SoftVec::COUNT],
    pub(crate) msgboxes: [MsgBox; MsgBoxId::COUNT],
    pub(crate) heap: Heap,
    pub(crate) stacks: StackArena,
}

impl<P: Port> Kernel<P> {
    /// A kernel with empty tables and a fresh heap, not yet running
    /// anything. Call [`Kernel::start`] to bring it up.
    pub fn new(port: P) -> Self {
        Kernel {
            port,
            threads: core::array::from_fn(|_| Tcb::new()),
            readyque: [ReadyQueue::default(); PRIORITY_NUM],
            current: None,
            handlers: [None; SoftVec::COUNT],
            msgboxes: [MsgBox::default(); MsgBoxId::COUNT],
            heap: Heap::new(),
            stacks: StackArena::new(),
        }
    }

    /// Boots the kernel: claims the two reserved vectors, creates the
    /// initial thread, and dispatches it.
    ///
    /// No trap is possible yet, so the initial thread is created by calling
    /// the primitive directly, and it is dispatched without consulting the
    /// scheduler -- there is exactly one candidate. Everything after this
    /// happens through [`Kernel::interrupt_entry`].
    pub fn start(
        &mut self,
        entry: ThreadEntry,
        name: &'static str,
        priority: Priority,
        stack_size: usize,
    ) {
        self.set_interrupt(SoftVec::Syscall, Kernel::syscall_intr);
        self.set_interrupt(SoftVec::SoftErr, Kernel::softerr_intr);

        if self
            .run_thread(entry, name, priority, stack_size, 0, core::ptr::null())
            .is_err()
        {
            fail::die("boot thread creation failed");
        }

        // run_thread left the newcomer as current.
        let Some(cur) = self.current else {
            fail::die("boot finished without a thread")
        };
        let context = self.threads[usize::from(cur)].context;
        self.port.dispatch(&context);
    }

    /// The running thread's handle, if any.
    pub fn current(&self) -> Option<ThreadId> {
        self.current.map(ThreadId)
    }

    /// Reads a thread's result slot. Diagnostic surface: on hardware only
    /// the thread itself ever looks at its slot, through the syscall stub.
    pub fn reply(&self, id: ThreadId) -> Reply {
        fail::uassert!(id.index() < THREAD_NUM);
        self.threads[id.index()].reply
    }

    /// A thread's console name.
    pub fn thread_name(&self, id: ThreadId) -> &str {
        fail::uassert!(id.index() < THREAD_NUM);
        crate::thread::name_str(&self.threads[id.index()].name)
    }

    /// Whether a thread is linked into a ready queue.
    pub fn thread_ready(&self, id: ThreadId) -> bool {
        fail::uassert!(id.index() < THREAD_NUM);
        self.threads[id.index()]
            .flags
            .contains(abi::ThreadFlags::READY)
    }

    /// The entry function and arguments captured when `id` was created.
    /// This is what the port's startup trampoline invokes on a fresh
    /// thread's first dispatch. `None` for a free slot.
    pub fn init_info(
        &self,
        id: ThreadId,
    ) -> Option<(ThreadEntry, i32, *const *const u8)> {
        fail::uassert!(id.index() < THREAD_NUM);
        let tcb = &self.threads[id.index()];
        tcb.init
            .entry
            .map(|entry| (entry, tcb.init.argc, tcb.init.argv))
    }

    /// Bytes currently sitting on the heap free lists.
    pub fn heap_free_bytes(&self) -> usize {
        self.heap.free_bytes()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}
