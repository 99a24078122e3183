// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The system-call dispatcher: the boundary between user threads and kernel
//! primitives.
//!
//! A thread asks for a primitive by writing a [`Syscall`] into its own TCB's
//! request slot and taking the trap; the low-level entry delivers that trap
//! to [`Kernel::syscall_intr`] through the common interrupt path. The
//! dispatcher's contract with the primitives: the caller is *unlinked* from
//! its ready queue before the primitive runs, so a primitive that wants its
//! caller to stay runnable must requeue it (`put_current`) before returning.
//! Blocking primitives simply don't, and `exit` destroys the caller
//! entirely.
//!
//! Results come back through the TCB's [`Reply`] slot. For a blocked
//! receive the slot holds [`Reply::Blocked`] until the matching send
//! overwrites it -- by the time the thread is scheduled again, the real
//! result is in place.
//!
//! The same primitives are reachable from interrupt handlers as **service
//! calls** ([`Kernel::service_call`]): no trap, no caller. `current` is
//! nulled for the duration so that primitives see an unambiguous "no caller"
//! state, and scheduling happens on the way out of the enclosing interrupt.

use core::ptr::NonNull;

use abi::{Error, MsgBoxId, Priority, SoftVec, ThreadId};

use crate::fail;
use crate::interrupt::Handler;
use crate::port::Port;
use crate::startup::Kernel;

/// A thread entry point: `fn(argc, argv)`, with the return value feeding the
/// exit trampoline.
pub type ThreadEntry = fn(argc: i32, argv: *const *const u8) -> i32;

/// A system-call request: the tagged parameter block a thread deposits in
/// its TCB before trapping.
pub enum Syscall<P: Port> {
    /// Create a thread.
    Run {
        entry: ThreadEntry,
        name: &'static str,
        priority: Priority,
        stack_size: usize,
        argc: i32,
        argv: *const *const u8,
    },
    /// Destroy the calling thread.
    Exit,
    /// Yield the CPU to the next thread of equal priority.
    Wait,
    /// Block until another thread calls `Wakeup`.
    Sleep,
    /// Unblock a sleeping thread.
    Wakeup { id: ThreadId },
    /// Ask for the caller's own handle.
    GetId,
    /// Change the caller's priority; `None` just queries it.
    ChPri { priority: Option<Priority> },
    /// Allocate from the kernel heap.
    KmAlloc { size: usize },
    /// Return a heap block.
    KmFree { ptr: NonNull<u8> },
    /// Post a message; ownership of `ptr` moves to the receiver.
    Send { mbox: MsgBoxId, size: usize, ptr: NonNull<u8> },
    /// Take the next message, blocking on an empty box.
    Recv { mbox: MsgBoxId },
    /// Install an interrupt handler for a soft vector.
    SetIntr { vector: SoftVec, handler: Handler<P> },
}

// Hand-rolled rather than derived: a derive would demand `P: Clone`, and the
// variants are all Copy data regardless of the port.
impl<P: Port> Clone for Syscall<P> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<P: Port> Copy for Syscall<P> {}

/// A primitive's result, written to the caller's TCB reply slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// The caller blocked; whoever unblocks it writes the real reply first.
    Blocked,
    /// Plain status, for the primitives that return nothing interesting.
    Code(i32),
    /// `Run`: the new thread's handle, or why there isn't one.
    Spawn(Result<ThreadId, Error>),
    /// `GetId`: the caller's handle.
    Id(ThreadId),
    /// `ChPri`: the previous priority.
    Pri(Priority),
    /// `KmAlloc`: the block, or `None` when the heap is exhausted.
    Mem(Option<NonNull<u8>>),
    /// `Send`: the payload size, echoed back.
    Size(usize),
    /// `Recv`: the delivered message.
    Recv { sender: Option<ThreadId>, size: usize, ptr: NonNull<u8> },
}

impl<P: Port> Kernel<P> {
    /// Reserved handler for the syscall vector: picks up the request the
    /// current thread deposited before trapping.
    pub(crate) fn syscall_intr(kernel: &mut Kernel<P>) {
        let Some(cur) = kernel.current else {
            fail::die("syscall trap with no current thread")
        };
        let Some(request) = kernel.threads[usize::from(cur)].request.take()
        else {
            fail::die("syscall trap without a request")
        };
        kernel.syscall_proc(cur, request);
    }

    /// Runs one system call for `caller`: unlink the caller, run the
    /// primitive, store the reply.
    ///
    /// `current` may be rebound while the primitive runs (`run` and `wakeup`
    /// both borrow it to requeue other threads), which is why the reply goes
    /// to the remembered caller rather than to whatever `current` ends up
    /// naming. `exit` gets no reply; there is no TCB left to hold one.
    fn syscall_proc(&mut self, caller: u16, request: Syscall<P>) {
        let destroys_caller = matches!(request, Syscall::Exit);
        self.take_current();
        let reply = self.call_functions(request);
        if !destroys_caller {
            self.threads[usize::from(caller)].reply = reply;
        }
    }

    /// Service call: the primitive set, invoked synchronously from interrupt
    /// context. The enclosing interrupt's epilogue does the scheduling;
    /// `current` is left for it to rebuild.
    pub fn service_call(&mut self, request: Syscall<P>) -> Reply {
        // Primitives identify their caller through `current`; inside an
        // interrupt there is none.
        self.current = None;
        self.call_functions(request)
    }

    /// The switch over the primitive set.
    fn call_functions(&mut self, request: Syscall<P>) -> Reply {
        match request {
            Syscall::Run {
                entry,
                name,
                priority,
                stack_size,
                argc,
                argv,
            } => Reply::Spawn(
                self.run_thread(entry, name, priority, stack_size, argc, argv),
            ),
            Syscall::Exit => {
                self.exit_thread();
                Reply::Blocked
            }
            Syscall::Wait => self.wait_thread(),
            Syscall::Sleep => self.sleep_thread(),
            Syscall::Wakeup { id } => self.wakeup_thread(id),
            Syscall::GetId => self.getid_thread(),
            Syscall::ChPri { priority } => self.chpri_thread(priority),
            Syscall::KmAlloc { size } => {
                self.put_current();
                Reply::Mem(self.heap.alloc(size))
            }
            Syscall::KmFree { ptr } => {
                self.heap.free(ptr);
                self.put_current();
                Reply::Code(0)
            }
            Syscall::Send { mbox, size, ptr } => {
                self.send_msg(mbox, size, ptr)
            }
            Syscall::Recv { mbox } => self.recv_msg(mbox),
            Syscall::SetIntr { vector, handler } => {
                self.set_interrupt(vector, handler);
                self.put_current();
                Reply::Code(0)
            }
        }
    }

    /// User-side stub: deposits `request` in the current thread's TCB and
    /// takes the trap. Returns the caller's reply slot, which for a blocking
    /// call still holds [`Reply::Blocked`] at this point -- on hardware the
    /// stub resumes only after the thread is rescheduled, and by then the
    /// slot has the real result.
    pub fn syscall(&mut self, request: Syscall<P>) -> Reply {
        let Some(cur) = self.current else {
            fail::die("syscall issued outside thread context")
        };
        self.threads[usize::from(cur)].request = Some(request);
        let sp = self.threads[usize::from(cur)].context.sp;
        self.interrupt_entry(SoftVec::Syscall, sp);
        self.threads[usize::from(cur)].reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        assert_queue_invariants, booted, recv_reply, spawn, static_payload,
    };

    #[test]
    fn kmalloc_and_kmfree_round_trip() {
        let mut kern = booted();
        let baseline = kern.heap_free_bytes();

        let Reply::Mem(Some(p)) = kern.syscall(Syscall::KmAlloc { size: 64 })
        else {
            panic!("kmalloc failed");
        };
        assert!(kern.heap_free_bytes() < baseline);

        assert_eq!(
            kern.syscall(Syscall::KmFree { ptr: p }),
            Reply::Code(0)
        );
        assert_eq!(kern.heap_free_bytes(), baseline);
        assert_queue_invariants(&kern);
    }

    #[test]
    fn kmalloc_reports_exhaustion_as_null() {
        let mut kern = booted();
        let boot = kern.current().unwrap();
        let reply =
            kern.syscall(Syscall::KmAlloc { size: usize::MAX / 2 });
        assert_eq!(reply, Reply::Mem(None));
        // The caller is still runnable.
        assert_eq!(kern.current(), Some(boot));
        assert!(kern.thread_ready(boot));
        assert_queue_invariants(&kern);
    }

    #[test]
    fn heap_payloads_move_across_a_box() {
        let mut kern = booted();
        let baseline = kern.heap_free_bytes();

        // Sender allocates and fills a payload.
        let Reply::Mem(Some(p)) = kern.syscall(Syscall::KmAlloc { size: 18 })
        else {
            panic!("kmalloc failed");
        };
        // The kernel never touches payload bytes; the "user thread" does.
        unsafe {
            core::ptr::copy_nonoverlapping(
                b"allocated memory\n\0".as_ptr(),
                p.as_ptr(),
                18,
            );
        }
        kern.syscall(Syscall::Send {
            mbox: MsgBoxId::ConsOutput,
            size: 18,
            ptr: p,
        });

        // Receiver takes delivery of the identical block and frees it.
        let (_, size, ptr) = recv_reply(kern.syscall(Syscall::Recv {
            mbox: MsgBoxId::ConsOutput,
        }));
        assert_eq!(size, 18);
        assert_eq!(ptr, p);
        let bytes =
            unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
        assert_eq!(bytes, b"allocated memory\n\0");

        kern.syscall(Syscall::KmFree { ptr });
        assert_eq!(kern.heap_free_bytes(), baseline);
    }

    #[test]
    fn requests_are_consumed_by_the_trap() {
        let mut kern = booted();
        let boot = kern.current().unwrap();
        kern.syscall(Syscall::Wait);
        assert!(kern.threads[boot.index()].request.is_none());
    }

    #[test]
    fn service_call_send_has_no_sender() {
        let mut kern = booted();
        let boot = kern.current().unwrap();
        let (p, s) = static_payload(b"from isr\n");

        let reply = kern.service_call(Syscall::Send {
            mbox: MsgBoxId::ConsInput,
            size: s,
            ptr: p,
        });
        assert_eq!(reply, Reply::Size(s));

        // Scheduling normally happens in the interrupt epilogue; model it.
        kern.schedule();
        assert_eq!(kern.current(), Some(boot));

        let (sender, size, ptr) = recv_reply(kern.syscall(Syscall::Recv {
            mbox: MsgBoxId::ConsInput,
        }));
        assert_eq!(sender, None);
        assert_eq!(size, s);
        assert_eq!(ptr, p);
    }

    #[test]
    fn service_call_recv_on_empty_box_parks_nobody() {
        let mut kern = booted();
        let reply =
            kern.service_call(Syscall::Recv { mbox: MsgBoxId::ConsInput });
        assert_eq!(reply, Reply::Blocked);
        assert!(kern.msgboxes[MsgBoxId::ConsInput.index()]
            .receiver
            .is_none());
        kern.schedule();
        assert_queue_invariants(&kern);
    }

    #[test]
    fn service_call_recv_with_a_pending_message_is_fatal() {
        let mut kern = booted();
        let (p, s) = static_payload(b"undeliverable\n");
        kern.syscall(Syscall::Send {
            mbox: MsgBoxId::ConsInput,
            size: s,
            ptr: p,
        });

        // With a message waiting, an interrupt-context receive would have
        // to deliver to a caller that does not exist.
        let result = std::panic::catch_unwind(
            std::panic::AssertUnwindSafe(|| {
                kern.service_call(Syscall::Recv {
                    mbox: MsgBoxId::ConsInput,
                });
            }),
        );
        assert!(result.is_err());
        assert!(kern.port().console().contains("system error!\n"));
    }

    #[test]
    fn service_call_wakeup_reschedules_a_sleeper() {
        let mut kern = booted();
        let sleeper = spawn(&mut kern, "sleeper", 2);
        kern.syscall(Syscall::Sleep);
        assert!(!kern.thread_ready(sleeper));

        let reply = kern.service_call(Syscall::Wakeup { id: sleeper });
        assert_eq!(reply, Reply::Code(0));
        assert!(kern.thread_ready(sleeper));
        kern.schedule();
        assert_eq!(kern.current(), Some(sleeper));
        assert_queue_invariants(&kern);
    }
}
