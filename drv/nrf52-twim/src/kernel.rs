// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the driver needs from the system underneath it.
//!
//! The driver runs without direct access to the peripheral: register
//! reads and writes, pin setup, and interrupt routing are all requests to a
//! supervising kernel.  Boards provide an implementation of [`Platform`];
//! host tests provide a simulated one.

use crate::config::Pin;
use drv_i2c_types::Bus;

/// Start of the data RAM that EasyDMA can reach.
pub const RAM_BASE: usize = 0x2000_0000;
/// Size of that RAM on the nRF52832.
pub const RAM_SIZE: usize = 0x1_0000;

/// Privileged register access.  Each call is a separate trap; there are no
/// burst or read-modify-write semantics.
pub trait RegisterIo {
    fn read(&self, addr: u32) -> u32;
    fn write(&self, addr: u32, value: u32);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinMode {
    /// Input with the output driver in open-drain mode and the pull-up
    /// enabled: the idle state of an I2C line.
    InputOpenDrainPullUp,
}

pub trait Platform: RegisterIo {
    fn configure_pin(&self, pin: Pin, mode: PinMode);

    /// Routes the interrupt of the peripheral at `base` to the TWIM
    /// driver, with `bus` as the context handed back to
    /// [`Twim::handle_irq`](crate::Twim::handle_irq).  The line may be
    /// shared with another role of the same instance (SPIM/SPIS/TWIS), so
    /// this is called again on every acquire.
    fn register_irq(&self, base: u32, bus: Bus);

    /// Gives the interrupt of the peripheral at `base` back to whoever
    /// else shares the instance.
    fn release_irq(&self, base: u32);

    /// The EasyDMA address of `len` bytes at `ptr`, or `None` if the
    /// memory is out of reach of the DMA engine (flash, for instance) and
    /// must be staged through RAM first.
    fn dma_address(&self, ptr: *const u8, len: usize) -> Option<u32> {
        let start = ptr as usize;
        let end = start.checked_add(len)?;

        if start >= RAM_BASE && end <= RAM_BASE + RAM_SIZE {
            u32::try_from(start).ok()
        } else {
            None
        }
    }
}
