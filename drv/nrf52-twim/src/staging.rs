// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The staging buffer.
//!
//! EasyDMA can only transmit from RAM, and only from one contiguous region
//! per transfer.  Data in flash, and a register selector that has to
//! precede a payload, are therefore copied here first.  There is one buffer
//! for all buses; the checkout is held until the transfer using it has
//! completed, so the DMA engine never reads bytes that another caller is
//! in the middle of replacing.

use crate::signal::BinaryLock;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub const STAGING_LEN: usize = 256;

pub struct StagingBuffer<L> {
    lock: L,
    bytes: UnsafeCell<[u8; STAGING_LEN]>,
}

// Safety: `bytes` is only reachable through a `Staged`, and `lock` allows one
// of those at a time.
unsafe impl<L: BinaryLock> Sync for StagingBuffer<L> {}

impl<L: BinaryLock> StagingBuffer<L> {
    pub fn new() -> Self {
        Self {
            lock: L::new(false),
            bytes: UnsafeCell::new([0; STAGING_LEN]),
        }
    }

    /// Takes the buffer, blocking while someone else has it.
    pub fn checkout(&self) -> Staged<'_, L> {
        self.lock.lock();
        Staged { owner: self }
    }

    pub fn try_checkout(&self) -> Option<Staged<'_, L>> {
        if self.lock.try_lock() {
            Some(Staged { owner: self })
        } else {
            None
        }
    }
}

impl<L: BinaryLock> Default for StagingBuffer<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive use of the staging buffer; returned on drop.
pub struct Staged<'a, L: BinaryLock> {
    owner: &'a StagingBuffer<L>,
}

impl<L: BinaryLock> Deref for Staged<'_, L> {
    type Target = [u8; STAGING_LEN];

    fn deref(&self) -> &Self::Target {
        // Safety: holding a `Staged` means holding the lock.
        unsafe { &*self.owner.bytes.get() }
    }
}

impl<L: BinaryLock> DerefMut for Staged<'_, L> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: as above, and `&mut self` rules out aliasing through this
        // same checkout.
        unsafe { &mut *self.owner.bytes.get() }
    }
}

impl<L: BinaryLock> Drop for Staged<'_, L> {
    fn drop(&mut self) {
        self.owner.lock.unlock();
    }
}
