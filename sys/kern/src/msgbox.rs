// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message boxes: a fixed set of FIFO mailboxes with at most one parked
//! receiver each.
//!
//! A message is an envelope plus a payload. The envelope lives in a kernel
//! heap block for exactly the span between `send` and the matching delivery;
//! the payload is whatever pointer the sender handed over, and the kernel
//! never reads or writes a byte of it. Ownership of the payload moves with
//! the message: sender to kernel at `send`, kernel to receiver at delivery.
//! Heap-origin payloads are the receiver's to free.
//!
//! The rendezvous works in both orders. Sender first: envelopes pile up in
//! the box FIFO until someone receives. Receiver first: the receiver parks
//! itself in the box (off the ready queues, READY clear) and the next send
//! writes the receiver's result slot directly, requeues it, and frees the
//! envelope before the sender even returns.

use core::mem::size_of;
use core::ptr::NonNull;

use abi::{MsgBoxId, ThreadId};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::fail;
use crate::port::Port;
use crate::startup::Kernel;
use crate::syscalls::Reply;

/// Envelope-list terminator and "sent from interrupt context" marker.
const NIL: u32 = u32::MAX;

/// In-heap message envelope. Offsets, not pointers, so the structure is
/// stable wherever the kernel sits; `ptr` is the one exception, an opaque
/// payload address the kernel only carries.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable,
    KnownLayout,
)]
#[repr(C)]
struct MsgBuf {
    /// Payload address. Never dereferenced by the kernel.
    ptr: usize,
    /// Payload size in bytes, as claimed by the sender.
    size: usize,
    /// Next envelope in the box FIFO, as a heap payload offset; `NIL` at the
    /// tail.
    next: u32,
    /// Sending thread's TCB index; `NIL` when the send came from interrupt
    /// context via a service call.
    sender: u32,
}

/// One message box.
#[derive(Copy, Clone, Default)]
pub(crate) struct MsgBox {
    /// The thread parked in `recv` on this box, if any.
    pub(crate) receiver: Option<u16>,
    /// Box FIFO of envelope offsets.
    head: Option<u32>,
    tail: Option<u32>,
}

impl<P: Port> Kernel<P> {
    fn read_msgbuf(&self, off: u32) -> MsgBuf {
        MsgBuf::read_from_prefix(
            self.heap.bytes(off as usize, size_of::<MsgBuf>()),
        )
        .map(|(m, _)| m)
        .unwrap_or_else(|_| fail::die("msgbox: truncated envelope"))
    }

    fn write_msgbuf(&mut self, off: u32, buf: MsgBuf) {
        buf.write_to(self.heap.bytes_mut(off as usize, size_of::<MsgBuf>()))
            .unwrap_or_else(|_| fail::die("msgbox: truncated envelope"))
    }

    /// Wraps a payload in a fresh envelope and appends it to the box FIFO.
    /// Envelope allocation failure is fatal; `send` has no error path.
    fn sendmsg(&mut self, mbox: MsgBoxId, size: usize, ptr: NonNull<u8>) {
        let Some(off) = self.heap.alloc_raw(size_of::<MsgBuf>()) else {
            self.down()
        };
        let off = off as u32;
        self.write_msgbuf(
            off,
            MsgBuf {
                ptr: ptr.as_ptr() as usize,
                size,
                next: NIL,
                sender: self.current.map_or(NIL, u32::from),
            },
        );

        match self.msgboxes[mbox.index()].tail {
            Some(tail) => {
                let mut t = self.read_msgbuf(tail);
                t.next = off;
                self.write_msgbuf(tail, t);
            }
            None => self.msgboxes[mbox.index()].head = Some(off),
        }
        self.msgboxes[mbox.index()].tail = Some(off);
    }

    /// Pops the head envelope, writes the parked receiver's result slot,
    /// unparks the box, and frees the envelope.
    fn recvmsg(&mut self, mbox: MsgBoxId) {
        let b = self.msgboxes[mbox.index()];
        let Some(head) = b.head else {
            fail::die("msgbox: delivery from an empty box")
        };
        let Some(receiver) = b.receiver else {
            fail::die("msgbox: delivery with no receiver")
        };

        let buf = self.read_msgbuf(head);
        let next = if buf.next == NIL { None } else { Some(buf.next) };
        self.msgboxes[mbox.index()].head = next;
        if next.is_none() {
            self.msgboxes[mbox.index()].tail = None;
        }

        let sender = if buf.sender == NIL {
            None
        } else {
            Some(ThreadId(buf.sender as u16))
        };
        let ptr = NonNull::new(buf.ptr as *mut u8)
            .unwrap_or_else(|| fail::die("msgbox: null payload"));
        self.threads[usize::from(receiver)].reply =
            Reply::Recv { sender, size: buf.size, ptr };

        self.msgboxes[mbox.index()].receiver = None;
        self.heap.free_raw(head as usize);
    }

    /// Send primitive. Queues the message and, when a receiver is parked,
    /// completes the rendezvous on the spot: the receiver becomes READY
    /// before the sender returns, so a more important receiver preempts the
    /// sender on the way out of the dispatcher.
    pub(crate) fn send_msg(
        &mut self,
        mbox: MsgBoxId,
        size: usize,
        ptr: NonNull<u8>,
    ) -> Reply {
        self.put_current();
        self.sendmsg(mbox, size, ptr);

        if let Some(receiver) = self.msgboxes[mbox.index()].receiver {
            self.current = Some(receiver);
            self.recvmsg(mbox);
            self.put_current();
        }

        Reply::Size(size)
    }

    /// Receive primitive. Two receivers in one box is a protocol violation
    /// and fatal. With a message pending, delivery is synchronous and the
    /// caller stays runnable; with an empty box the caller parks, stays off
    /// the ready queues, and the blocked sentinel sits in its result slot
    /// until a sender overwrites it.
    pub(crate) fn recv_msg(&mut self, mbox: MsgBoxId) -> Reply {
        if self.msgboxes[mbox.index()].receiver.is_some() {
            self.down()
        }
        self.msgboxes[mbox.index()].receiver = self.current;

        if self.msgboxes[mbox.index()].head.is_none() {
            return Reply::Blocked;
        }

        let Some(cur) = self.current else {
            // A service-call receive has nowhere to deliver a pending
            // message.
            self.down()
        };
        self.recvmsg(mbox);
        self.put_current();
        self.threads[usize::from(cur)].reply
    }
}
