// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What happens when the kernel cannot continue.
//!
//! A fatal condition ends in [`die`]. On bare metal there is nobody to
//! report to, so `die` leaves a post-mortem record where an attached
//! debugger can find it by symbol name and then parks the CPU for good:
//! `KERNEL_HAS_FAILED` flips to true, and `KERNEL_EPITAPH` holds the reason
//! string (UTF-8, NUL-padded, cut off at the buffer size -- readers should
//! strip the padding). If `die` is somehow reached twice, the record of the
//! first failure is the interesting one and is left alone.
//!
//! On a hosted build `die` is just a panic. The test suite leans on this:
//! "the kernel goes down" becomes an observable, catchable event.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use core::sync::atomic::{fence, Ordering};

        /// Post-mortem flag, readable by debug tooling. False from reset
        /// until the kernel fails.
        #[used]
        static mut KERNEL_HAS_FAILED: bool = false;

        /// Post-mortem reason string; see the module docs for the format.
        #[used]
        static mut KERNEL_EPITAPH: [u8; 128] = [0; 128];

        /// Records `msg` for the debugger and parks the CPU. Does not
        /// return.
        pub fn die(msg: &str) -> ! {
            // Safety: one core, and kernel code runs with interrupts off,
            // so nothing else can be touching the post-mortem statics. The
            // flag check keeps a failure-during-failure from scribbling
            // over the evidence.
            unsafe {
                let failed =
                    &mut *core::ptr::addr_of_mut!(KERNEL_HAS_FAILED);
                if !*failed {
                    *failed = true;
                    let epitaph =
                        &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH);
                    for (slot, byte) in
                        epitaph.iter_mut().zip(msg.as_bytes())
                    {
                        *slot = *byte;
                    }
                }
            }
            loop {
                // Portable stand-in for a halt instruction.
                fence(Ordering::SeqCst);
            }
        }

        #[panic_handler]
        fn panic(_info: &core::panic::PanicInfo<'_>) -> ! {
            die("kernel panic")
        }
    } else {
        /// Hosted rendition of the failure path: a plain panic, so tests can
        /// catch it and inspect what the kernel said on the way down.
        pub fn die(msg: &str) -> ! {
            panic!("{msg}");
        }
    }
}

/// Kernel-internal assertion. A failed `uassert!` means a kernel invariant
/// has been violated, which is never recoverable.
macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            $crate::fail::die(concat!(
                "kernel assertion failed: ",
                stringify!($cond)
            ))
        }
    };
}
pub(crate) use uassert;
