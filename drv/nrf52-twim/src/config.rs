// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus descriptors.  The board's table is generated at build time from the
//! application TOML; see `build/twim`.

use crate::kernel::RegisterIo;
use crate::regs::Reg;

///
/// A GPIO, as encoded into the `PSEL` registers.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Pin {
    pub port: u8,
    pub pin: u8,
}

impl Pin {
    pub const fn new(port: u8, pin: u8) -> Self {
        Self { port, pin }
    }

    /// `PSEL` encoding: port in bit 5, pin in bits 0-4, connected.
    pub const fn psel(self) -> u32 {
        ((self.port as u32 & 1) << 5) | (self.pin as u32 & 0x1f)
    }
}

impl core::fmt::Display for Pin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "P{}.{:02}", self.port, self.pin)
    }
}

/// Bus speeds the TWIM can generate, as `FREQUENCY` register values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Frequency {
    K100 = 0x0198_0000,
    K250 = 0x0400_0000,
    K400 = 0x0640_0000,
}

///
/// Everything the driver needs to know about one TWIM instance.  These are
/// immutable for the life of the system.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusConfig {
    pub base: u32,
    pub scl: Pin,
    pub sda: Pin,
    pub frequency: Frequency,
}

impl BusConfig {
    pub const fn shared(&self) -> SharedPeripheral {
        SharedPeripheral {
            scl: self.scl,
            sda: self.sda,
            frequency: self.frequency,
        }
    }
}

///
/// The registers a TWIM instance has in common with the other roles mapped
/// at the same base (SPIM/SPIS/TWIS).  `PSEL.SCL` and `PSEL.SDA` sit where
/// SPIM has `PSEL.SCK` and `PSEL.MOSI`, and `FREQUENCY` is at the same
/// offset in both.  Whichever role was last active may have rewritten them,
/// so they are reprogrammed every time the bus is acquired.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SharedPeripheral {
    pub scl: Pin,
    pub sda: Pin,
    pub frequency: Frequency,
}

impl SharedPeripheral {
    pub fn program<R: RegisterIo + ?Sized>(&self, io: &R, base: u32) {
        io.write(base + Reg::PselScl.offset(), self.scl.psel());
        io.write(base + Reg::PselSda.offset(), self.sda.psel());
        io.write(base + Reg::Frequency.offset(), self.frequency as u32);
    }
}
