// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Blocking primitives.
//!
//! Everything in the driver that blocks does so through a [`BinaryLock`]:
//! the staging buffer, the reconfiguration guard, and the per-bus
//! [`Completion`] that an interrupt uses to wake the thread waiting on it.
//! Unlike a mutex guard, a binary lock may be unlocked from a context
//! other than the one that locked it, which is exactly what the interrupt
//! path needs.

use core::sync::atomic::{AtomicBool, Ordering};

pub trait BinaryLock: Send + Sync {
    fn new(locked: bool) -> Self
    where
        Self: Sized;

    /// Blocks until the lock is free, then takes it.
    fn lock(&self);

    /// Takes the lock if it is free.
    fn try_lock(&self) -> bool;

    /// Frees the lock.  Must be callable from interrupt context.
    fn unlock(&self);
}

/// A lock that busy-waits.  Good enough for an interrupt-to-thread handoff
/// on a system with nothing better; a kernel that can park threads should
/// supply its own [`BinaryLock`].
#[derive(Debug)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl BinaryLock for SpinLock {
    fn new(locked: bool) -> Self {
        Self {
            locked: AtomicBool::new(locked),
        }
    }

    fn lock(&self) {
        while !self.try_lock() {
            core::hint::spin_loop();
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// A lock that parks the waiting thread.
#[cfg(not(target_os = "none"))]
#[derive(Debug)]
pub struct CondvarLock {
    locked: std::sync::Mutex<bool>,
    freed: std::sync::Condvar,
}

#[cfg(not(target_os = "none"))]
impl CondvarLock {
    fn state(&self) -> std::sync::MutexGuard<'_, bool> {
        // The critical sections below cannot panic, so poisoning carries no
        // information.
        self.locked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(not(target_os = "none"))]
impl BinaryLock for CondvarLock {
    fn new(locked: bool) -> Self {
        Self {
            locked: std::sync::Mutex::new(locked),
            freed: std::sync::Condvar::new(),
        }
    }

    fn lock(&self) {
        let mut locked = self.state();
        while *locked {
            locked = self
                .freed
                .wait(locked)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *locked = true;
    }

    fn try_lock(&self) -> bool {
        let mut locked = self.state();
        !core::mem::replace(&mut *locked, true)
    }

    fn unlock(&self) {
        *self.state() = false;
        self.freed.notify_one();
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        pub type DefaultLock = SpinLock;
    } else {
        pub type DefaultLock = CondvarLock;
    }
}

///
/// The rendezvous between a thread waiting for a transfer and the
/// interrupt that ends it.  Held locked while nothing has happened; a
/// [`post`](Completion::post) frees it and the waiter's
/// [`wait`](Completion::wait) takes it again.  Posts do not accumulate:
/// two posts with no wait in between wake one waiter once.
///
#[derive(Debug)]
pub struct Completion<L> {
    lock: L,
}

impl<L: BinaryLock> Completion<L> {
    pub fn new() -> Self {
        Self {
            lock: L::new(true),
        }
    }

    /// Returns to the "nothing happened" state, swallowing any post that
    /// arrived since the last wait.
    pub fn reset(&self) {
        let _ = self.lock.try_lock();
    }

    pub fn post(&self) {
        self.lock.unlock();
    }

    pub fn wait(&self) {
        self.lock.lock();
    }
}

impl<L: BinaryLock> Default for Completion<L> {
    fn default() -> Self {
        Self::new()
    }
}
