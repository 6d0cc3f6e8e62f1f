// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A handle on one device: a bus, an address, and the width of the
//! device's register selectors.

use crate::kernel::Platform;
use crate::signal::BinaryLock;
use crate::Twim;
use drv_i2c_types::{Bus, Flags, ResponseCode};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

pub struct I2cDevice<'t, 'a, P, L, const N: usize> {
    twim: &'t Twim<'a, P, L, N>,
    pub bus: Bus,
    pub address: u8,
    flags: Flags,
}

impl<P, L, const N: usize> core::fmt::Display for I2cDevice<'_, '_, P, L, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{:#x}", self.bus, self.address)
    }
}

impl<'t, 'a, P: Platform, L: BinaryLock, const N: usize>
    I2cDevice<'t, 'a, P, L, N>
{
    pub fn new(twim: &'t Twim<'a, P, L, N>, bus: Bus, address: u8) -> Self {
        Self {
            twim,
            bus,
            address,
            flags: Flags::empty(),
        }
    }

    /// Use two-byte register selectors, sent MSB first.
    pub fn with_reg16(mut self) -> Self {
        self.flags |= Flags::REG16;
        self
    }

    ///
    /// Reads a register, returning a value of type `V`.  The register is
    /// written, and then `size_of::<V>()` bytes are read back after a
    /// repeated START.
    ///
    pub fn read_reg<V: IntoBytes + FromBytes>(
        &self,
        reg: u16,
    ) -> Result<V, ResponseCode> {
        let mut val = V::new_zeroed();
        self.twim.read_with_register(
            self.bus,
            self.address,
            reg,
            val.as_mut_bytes(),
            self.flags,
        )?;
        Ok(val)
    }

    /// Reads a register into `buf`, filling it.
    pub fn read_reg_into(
        &self,
        reg: u16,
        buf: &mut [u8],
    ) -> Result<(), ResponseCode> {
        self.twim
            .read_with_register(self.bus, self.address, reg, buf, self.flags)
    }

    /// Reads `size_of::<V>()` bytes with no register selector.
    pub fn read<V: IntoBytes + FromBytes>(&self) -> Result<V, ResponseCode> {
        let mut val = V::new_zeroed();
        self.twim
            .read(self.bus, self.address, val.as_mut_bytes(), Flags::empty())?;
        Ok(val)
    }

    pub fn read_into(&self, buf: &mut [u8]) -> Result<(), ResponseCode> {
        self.twim.read(self.bus, self.address, buf, Flags::empty())
    }

    pub fn write(&self, buf: &[u8]) -> Result<(), ResponseCode> {
        self.twim.write(self.bus, self.address, buf, Flags::empty())
    }

    pub fn write_reg(&self, reg: u16, buf: &[u8]) -> Result<(), ResponseCode> {
        self.twim
            .write_with_register(self.bus, self.address, reg, buf, self.flags)
    }
}
