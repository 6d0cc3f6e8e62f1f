// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing drivers
//!
//! This contains an implementation for a static ring buffer designed to be
//! used to instrument arbitrary contexts, including interrupt handlers.  The
//! ring buffer is a post-mortem aid: entries are cheap to record, are never
//! formatted on the device, and can be read back either from a debugger or
//! (on the host) through [`Ringbuf::snapshot`].
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! Recording never blocks.  If the buffer is already being written (an
//! interrupt landed in the middle of a thread's `ringbuf_entry!`, or two host
//! threads raced), the losing entry is discarded and counted in
//! [`Ringbuf::dropped`].
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! ## Creating a ring buffer
//!
//! ```
//! ringbuf!(Trace, 16, Trace::None);
//! ```
//!
//! Entries are generated with [`ringbuf_entry!`]:
//!
//! ```
//! ringbuf_entry!(Trace::Irq(bus));
//! ```
//!
//! A named ring buffer is declared and poked the same way:
//!
//! ```
//! ringbuf!(TWIM_RINGBUF, Trace, 16, Trace::None);
//! ringbuf_entry!(TWIM_RINGBUF, Trace::Irq(bus));
//! ```
//!
//! ## Inspecting a ring buffer via GDB
//!
//! The entries live in a `spin::Mutex`; with symbols loaded they can be
//! printed directly:
//!
//! ```console
//! (gdb) set print pretty on
//! (gdb) print drv_nrf52_twim::__RINGBUF.inner.data
//! ```

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicU32, Ordering};

/// Re-exported so that code generated by the macros can always find it.
pub use spin;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase.
///
/// To support the common case of having one quickly-installed ringbuffer per
/// module, if you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::Ringbuf<$t, $n> = $crate::Ringbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`.
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before touching the buffer so that the
        // payload expression can't observe the buffer's binding.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::record(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// A single [`Ringbuf`] entry.  When an entry is recorded with an identical
/// payload to the most recent entry (in terms of both `line` and `payload`),
/// `count` is incremented rather than consuming a new slot.
///
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// The slots of a ring buffer, plus the index of the newest one.
#[derive(Debug, Copy, Clone)]
pub struct Entries<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    inner: spin::Mutex<Entries<T, N>>,
    dropped: AtomicU32,
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            inner: spin::Mutex::new(Entries {
                last: None,
                buffer: [RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: init,
                }; N],
            }),
            dropped: AtomicU32::new(0),
        }
    }

    /// Records `payload` as having come from `line`.  Never blocks: if the
    /// slots are busy, the entry is counted as dropped.
    pub fn record(&self, line: u16, payload: T) {
        match self.inner.try_lock() {
            Some(mut entries) => entries.entry(line, payload),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of entries discarded because of contention.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copies out the current contents.  Unlike [`Ringbuf::record`] this
    /// spins until the slots are free, so it must not be called from an
    /// interrupt handler.
    pub fn snapshot(&self) -> Entries<T, N> {
        *self.inner.lock()
    }
}

impl<T: Copy + PartialEq, const N: usize> Entries<T, N> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // A never-poked buffer has no last slot; treating that as usize::MAX
        // makes the dedup check below miss and the wrap logic land on 0.
        let last = self.last.unwrap_or(usize::MAX);

        // `get_mut` rather than indexing so that a corrupt `last` restarts
        // us at slot 0 instead of panicking.
        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        // No remainder operation here: the targets have no hardware divide,
        // and this form also maps usize::MAX to 0.
        let next = last.wrapping_add(1);
        let ndx = if next >= self.buffer.len() { 0 } else { next };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Iterates over the recorded entries, oldest first.  Slots that have
    /// never been written are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) if last < N => last + 1,
            _ => 0,
        };
        (0..N)
            .map(move |i| &self.buffer[(start + i) % N])
            .filter(|ent| ent.generation != 0)
    }

    /// The most recently recorded payload, if any.
    pub fn latest(&self) -> Option<T> {
        self.last
            .and_then(|ndx| self.buffer.get(ndx))
            .map(|ent| ent.payload)
    }
}
