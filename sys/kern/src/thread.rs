// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Threads: control blocks, ready queues, stacks, and the scheduler.
//!
//! The TCB pool is a fixed array; threads are named by their index. Ready
//! queues are one FIFO per priority, linked through the `next` index inside
//! the TCB itself. The invariant tying it together: a thread's READY flag is
//! set exactly when it is linked into the queue for its priority, and
//! `current` -- when READY -- is the head of its queue.
//!
//! Stacks come from a single arena carved by a bump pointer. The pointer only
//! grows; `exit` does not give a stack back. That is a deliberate property of
//! the design (creation is expected to be rare and mostly at boot), so a
//! workload that churns threads will eventually exhaust the arena.

use core::mem::take;

use abi::{Error, Priority, ThreadFlags, ThreadId, THREAD_NAME_SIZE};

use crate::fail::{self, uassert};
use crate::port::{klog, Context, Port};
use crate::startup::Kernel;
use crate::syscalls::{Reply, Syscall, ThreadEntry};
use crate::THREAD_NUM;

/// Size of the user-stack arena shared by all threads.
pub const USER_STACK_ARENA_SIZE: usize = 8 * 1024;

/// Entry information captured at creation for the startup trampoline.
pub(crate) struct InitInfo {
    pub(crate) entry: Option<ThreadEntry>,
    pub(crate) argc: i32,
    pub(crate) argv: *const *const u8,
}

/// Thread control block.
pub(crate) struct Tcb<P: Port> {
    /// Successor in this thread's ready queue, as a TCB index.
    pub(crate) next: Option<u16>,
    /// NUL-padded name, for the console.
    pub(crate) name: [u8; THREAD_NAME_SIZE + 1],
    pub(crate) priority: Priority,
    /// One past the high end of this thread's stack region, as an arena
    /// offset.
    pub(crate) stack: usize,
    pub(crate) flags: ThreadFlags,
    pub(crate) init: InitInfo,
    /// Request slot, written by the thread before trapping.
    pub(crate) request: Option<Syscall<P>>,
    /// Result slot, written by the dispatcher -- or, for a parked receiver,
    /// by the sender that eventually delivers.
    pub(crate) reply: Reply,
    pub(crate) context: Context,
}

impl<P: Port> Tcb<P> {
    pub(crate) fn new() -> Self {
        Tcb {
            next: None,
            name: [0; THREAD_NAME_SIZE + 1],
            priority: Priority(0),
            stack: 0,
            flags: ThreadFlags::empty(),
            init: InitInfo {
                entry: None,
                argc: 0,
                argv: core::ptr::null(),
            },
            request: None,
            reply: Reply::Blocked,
            context: Context { sp: 0 },
        }
    }

    /// A TCB is free exactly when it has no entry point.
    pub(crate) fn is_free(&self) -> bool {
        self.init.entry.is_none()
    }

    /// Zeroes the TCB back to its free state.
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    fn set_name(&mut self, name: &str) {
        let mut n = name.len().min(THREAD_NAME_SIZE);
        while !name.is_char_boundary(n) {
            n -= 1;
        }
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
    }
}

/// Renders a TCB name buffer for the console.
pub(crate) fn name_str(buf: &[u8; THREAD_NAME_SIZE + 1]) -> &str {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    core::str::from_utf8(&buf[..len]).unwrap_or("<bad name>")
}

/// One ready queue: a FIFO of TCB indices at a single priority.
#[derive(Copy, Clone, Default)]
pub(crate) struct ReadyQueue {
    pub(crate) head: Option<u16>,
    pub(crate) tail: Option<u16>,
}

/// The user-stack arena and its bump pointer.
pub(crate) struct StackArena {
    pub(crate) arena: [u8; USER_STACK_ARENA_SIZE],
    pub(crate) top: usize,
}

impl StackArena {
    pub(crate) fn new() -> Self {
        StackArena { arena: [0; USER_STACK_ARENA_SIZE], top: 0 }
    }
}

impl<P: Port> Kernel<P> {
    /// Unlinks `current` from the head of its ready queue and clears READY.
    ///
    /// No-op when there is no current thread (service-call context) or when
    /// it is already off the queues. The dispatcher calls this on entry so
    /// that primitives see their caller unlinked; any primitive that keeps
    /// the caller runnable must call [`Kernel::put_current`] before
    /// returning.
    pub(crate) fn take_current(&mut self) {
        let Some(cur) = self.current else { return };
        let cur_us = usize::from(cur);
        if !self.threads[cur_us].flags.contains(ThreadFlags::READY) {
            return;
        }
        let pri = self.threads[cur_us].priority.index();
        // A READY current thread is always at the head of its queue.
        uassert!(self.readyque[pri].head == Some(cur));
        let next = take(&mut self.threads[cur_us].next);
        self.readyque[pri].head = next;
        if next.is_none() {
            self.readyque[pri].tail = None;
        }
        self.threads[cur_us].flags.remove(ThreadFlags::READY);
    }

    /// Links `current` to the tail of its priority's ready queue and sets
    /// READY. No-op when there is no current thread or it is already queued.
    pub(crate) fn put_current(&mut self) {
        let Some(cur) = self.current else { return };
        let cur_us = usize::from(cur);
        if self.threads[cur_us].flags.contains(ThreadFlags::READY) {
            return;
        }
        self.threads[cur_us].flags.insert(ThreadFlags::READY);
        self.threads[cur_us].next = None;
        let pri = self.threads[cur_us].priority.index();
        match self.readyque[pri].tail {
            Some(tail) => self.threads[usize::from(tail)].next = Some(cur),
            None => self.readyque[pri].head = Some(cur),
        }
        self.readyque[pri].tail = Some(cur);
    }

    /// Picks the next thread to run: the head of the most important
    /// non-empty ready queue. An empty system is fatal -- there is no idle
    /// fallback in the kernel, so the application is expected to keep a
    /// thread at the numerically largest priority that sleeps the CPU.
    pub(crate) fn schedule(&mut self) {
        for queue in &self.readyque {
            if let Some(head) = queue.head {
                self.current = Some(head);
                return;
            }
        }
        self.down()
    }

    /// Creates a thread and queues it behind its priority.
    ///
    /// Both the creator (if any) and the new thread end up on their ready
    /// queues; the scheduler decides afterwards which of them runs. On pool
    /// exhaustion the creator is requeued and handed the error.
    pub(crate) fn run_thread(
        &mut self,
        entry: ThreadEntry,
        name: &str,
        priority: Priority,
        stack_size: usize,
        argc: i32,
        argv: *const *const u8,
    ) -> Result<ThreadId, Error> {
        uassert!(priority.is_valid());

        let Some(idx) = (0..THREAD_NUM).find(|&i| self.threads[i].is_free())
        else {
            self.put_current();
            return Err(Error::OutOfThreads);
        };

        let tcb = &mut self.threads[idx];
        tcb.reset();
        tcb.set_name(name);
        tcb.priority = priority;
        tcb.init.entry = Some(entry);
        tcb.init.argc = argc;
        tcb.init.argv = argv;

        // Carve a stack. The bump pointer only grows; see the module docs.
        let base = self.stacks.top;
        uassert!(stack_size > 0);
        uassert!(USER_STACK_ARENA_SIZE - base >= stack_size);
        let high = base + stack_size;
        self.stacks.top = high;
        self.stacks.arena[base..high].fill(0);
        self.threads[idx].stack = high;

        // The port builds the initial frame; priority 0 starts with
        // interrupts masked.
        let sp = self.port.init_stack(
            &mut self.stacks.arena[base..high],
            ThreadId(idx as u16),
            priority.masks_interrupts(),
        );
        uassert!(sp < stack_size);
        self.threads[idx].context = Context { sp: base + sp };

        klog!(self.port, "run {} pri {}", name, priority.0);

        // Requeue the creator, then queue the newcomer.
        self.put_current();
        self.current = Some(idx as u16);
        self.put_current();
        Ok(ThreadId(idx as u16))
    }

    /// Destroys the current thread: prints its exit notice and zeroes the
    /// TCB. The thread is not requeued, and its stack is not reclaimed. Any
    /// message payloads it still owned leak; owners free before exiting.
    pub(crate) fn exit_thread(&mut self) {
        let Some(cur) = self.current else {
            fail::die("exit with no current thread")
        };
        let tcb = &self.threads[usize::from(cur)];
        uassert!(!tcb.is_free());
        let name = tcb.name;
        self.port.puts(name_str(&name));
        self.port.puts(" EXIT.\n");
        self.threads[usize::from(cur)].reset();
    }

    /// Yields the CPU: requeues the caller at the tail of its priority.
    pub(crate) fn wait_thread(&mut self) -> Reply {
        self.put_current();
        Reply::Code(0)
    }

    /// Blocks the caller until another thread wakes it. Deliberately does
    /// not requeue; the caller stays off the queues with READY clear.
    pub(crate) fn sleep_thread(&mut self) -> Reply {
        Reply::Code(0)
    }

    /// Makes `id` runnable again, and requeues the caller. Waking a thread
    /// that is already READY, or a slot that has since been freed, does
    /// nothing.
    pub(crate) fn wakeup_thread(&mut self, id: ThreadId) -> Reply {
        uassert!(id.index() < THREAD_NUM);
        self.put_current();
        if !self.threads[id.index()].is_free() {
            self.current = Some(id.0);
            self.put_current();
        }
        Reply::Code(0)
    }

    /// Returns the caller's own handle.
    pub(crate) fn getid_thread(&mut self) -> Reply {
        let Some(cur) = self.current else {
            fail::die("getid with no current thread")
        };
        self.put_current();
        Reply::Id(ThreadId(cur))
    }

    /// Replaces the caller's priority (when one is given) and requeues it at
    /// the tail of the new priority's queue. Returns the old priority, so a
    /// second `chpri` can restore it.
    pub(crate) fn chpri_thread(&mut self, priority: Option<Priority>) -> Reply {
        let Some(cur) = self.current else {
            fail::die("chpri with no current thread")
        };
        let old = self.threads[usize::from(cur)].priority;
        if let Some(p) = priority {
            uassert!(p.is_valid());
            self.threads[usize::from(cur)].priority = p;
        }
        self.put_current();
        Reply::Pri(old)
    }

    /// Fatal kernel error: report and halt. Never returns.
    pub(crate) fn down(&mut self) -> ! {
        self.port.puts("system error!\n");
        fail::die("system error!")
    }
}
