// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `embedded-hal` blocking I2C traits, for device crates written against
//! them.  Empty buffers panic here just as they do in [`Twim`].

use crate::kernel::Platform;
use crate::signal::BinaryLock;
use crate::Twim;
use drv_i2c_types::{Bus, Flags, ResponseCode};
use embedded_hal::blocking::i2c::{Read, Write, WriteRead};

pub struct TwimBus<'t, 'a, P, L, const N: usize> {
    twim: &'t Twim<'a, P, L, N>,
    bus: Bus,
}

impl<'t, 'a, P: Platform, L: BinaryLock, const N: usize>
    TwimBus<'t, 'a, P, L, N>
{
    pub fn new(twim: &'t Twim<'a, P, L, N>, bus: Bus) -> Self {
        Self { twim, bus }
    }
}

impl<P: Platform, L: BinaryLock, const N: usize> Write
    for TwimBus<'_, '_, P, L, N>
{
    type Error = ResponseCode;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.twim.write(self.bus, address, bytes, Flags::empty())
    }
}

impl<P: Platform, L: BinaryLock, const N: usize> Read
    for TwimBus<'_, '_, P, L, N>
{
    type Error = ResponseCode;

    fn read(
        &mut self,
        address: u8,
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.twim.read(self.bus, address, buffer, Flags::empty())
    }
}

impl<P: Platform, L: BinaryLock, const N: usize> WriteRead
    for TwimBus<'_, '_, P, L, N>
{
    type Error = ResponseCode;

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.twim
            .write_read(self.bus, address, bytes, buffer, Flags::empty())
    }
}
