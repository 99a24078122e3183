// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared scaffolding for the kernel test suite.
//!
//! Tests drive a kernel built on the hosted port as a state machine: a
//! syscall "issued by" a thread is a syscall issued while that thread is
//! current, and an interrupt is a direct call to `interrupt_entry`. The
//! helpers here cover the recurring moves -- booting, spawning, unpacking
//! replies -- plus the queue-invariant walker most tests finish with.

use core::ptr::NonNull;

use abi::{Priority, ThreadFlags, ThreadId};

use crate::port::hosted::HostedPort;
use crate::startup::Kernel;
use crate::syscalls::{Reply, Syscall};
use crate::THREAD_NUM;

/// Priority the boot thread runs at in tests: middling, so tests can spawn
/// both more and less important peers.
pub(crate) const BOOT_PRI: u8 = 8;

/// Thread entry used where the body never actually runs.
pub(crate) fn idle_entry(_argc: i32, _argv: *const *const u8) -> i32 {
    0
}

/// A kernel booted with a single "boot" thread at [`BOOT_PRI`].
pub(crate) fn booted() -> Kernel<HostedPort> {
    let mut kern = Kernel::new(HostedPort::new());
    kern.start(idle_entry, "boot", Priority(BOOT_PRI), 512);
    kern
}

/// Spawns a thread from the current one and returns its handle, asserting
/// the creation succeeded.
pub(crate) fn spawn(
    kern: &mut Kernel<HostedPort>,
    name: &'static str,
    priority: u8,
) -> ThreadId {
    let reply = kern.syscall(Syscall::Run {
        entry: idle_entry,
        name,
        priority: Priority(priority),
        stack_size: 512,
        argc: 0,
        argv: core::ptr::null(),
    });
    match reply {
        Reply::Spawn(Ok(id)) => id,
        other => panic!("spawn of {name:?} failed: {other:?}"),
    }
}

/// Unpacks a `Reply::Recv`, panicking on anything else.
pub(crate) fn recv_reply(
    reply: Reply,
) -> (Option<ThreadId>, usize, NonNull<u8>) {
    match reply {
        Reply::Recv { sender, size, ptr } => (sender, size, ptr),
        other => panic!("expected a delivered message, got {other:?}"),
    }
}

/// Wraps a static byte string as a message payload.
pub(crate) fn static_payload(
    bytes: &'static [u8],
) -> (NonNull<u8>, usize) {
    let ptr = NonNull::new(bytes.as_ptr() as *mut u8)
        .expect("statics have addresses");
    (ptr, bytes.len())
}

/// Walks every ready queue and checks the structural invariants:
///
/// - a queue's threads all carry that queue's priority and the READY flag;
/// - each queue is `next`-linked from head to tail, tail last;
/// - a thread is on a queue exactly when READY, and never on two;
/// - an empty head means an empty tail;
/// - a READY `current` is the head of its queue.
pub(crate) fn assert_queue_invariants(kern: &Kernel<HostedPort>) {
    let mut seen = [0_usize; THREAD_NUM];

    for (pri, queue) in kern.readyque.iter().enumerate() {
        if queue.head.is_none() {
            assert!(
                queue.tail.is_none(),
                "queue {pri} has a tail but no head"
            );
            continue;
        }

        let mut cursor = queue.head;
        let mut last = None;
        while let Some(idx) = cursor {
            let tcb = &kern.threads[usize::from(idx)];
            assert_eq!(
                tcb.priority.index(),
                pri,
                "thread {idx} is on queue {pri} with the wrong priority"
            );
            assert!(
                tcb.flags.contains(ThreadFlags::READY),
                "thread {idx} is queued but not READY"
            );
            seen[usize::from(idx)] += 1;
            last = Some(idx);
            cursor = tcb.next;
        }
        assert_eq!(queue.tail, last, "queue {pri} tail is stale");
    }

    for (idx, tcb) in kern.threads.iter().enumerate() {
        let expected = usize::from(tcb.flags.contains(ThreadFlags::READY));
        assert_eq!(
            seen[idx], expected,
            "thread {idx}: READY flag and queue membership disagree"
        );
    }

    if let Some(cur) = kern.current {
        let tcb = &kern.threads[usize::from(cur)];
        if tcb.flags.contains(ThreadFlags::READY) {
            assert_eq!(
                kern.readyque[tcb.priority.index()].head,
                Some(cur),
                "READY current thread is not the head of its queue"
            );
        }
    }
}
