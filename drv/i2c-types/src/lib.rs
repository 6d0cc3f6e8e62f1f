// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common types for the TWIM transaction engine and its clients
//!
//! This crate works on both the host and embedded system, so it can be used in
//! host-side tests.

#![no_std]

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

/// The response code returned from a transfer.  Contract violations (a bad
/// bus, an empty or oversized buffer) are not represented here: those are
/// programming errors and panic.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ResponseCode {
    /// The requested flags ask for something the peripheral cannot do
    /// (suppressed START, 10-bit addressing, or a suppressed STOP on
    /// anything but a plain write).
    OperationNotSupported = 1,
    /// The device address was NACKed, implying that it is missing, unreachable,
    /// or not responding.
    NoDevice,
    /// A byte written to the device was NACKed, which may indicate an invalid
    /// parameter, end of received data, etc.
    NoRegister,
}

impl ResponseCode {
    /// The (negative) POSIX error number conventionally used for this code.
    pub const fn errno(self) -> i32 {
        match self {
            ResponseCode::OperationNotSupported => -95, // EOPNOTSUPP
            ResponseCode::NoDevice => -6,               // ENXIO
            ResponseCode::NoRegister => -5,             // EIO
        }
    }
}

impl From<ResponseCode> for u32 {
    fn from(rc: ResponseCode) -> Self {
        rc as u32
    }
}

impl TryFrom<u32> for ResponseCode {
    type Error = u32;

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        Self::from_u32(x).ok_or(x)
    }
}

bitflags::bitflags! {
    /// Per-transfer flags.  The bit values match the ones used by the common
    /// embedded I2C peripheral API so that flag words can be passed through
    /// from foreign callers unchanged.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct Flags: u8 {
        /// Use a 10-bit device address.
        const ADDR10 = 0x01;
        /// The register selector is 16 bits wide, sent MSB first.
        const REG16 = 0x02;
        /// Do not issue a STOP condition after the transfer.
        const NOSTOP = 0x04;
        /// Do not issue a START condition before the transfer.
        const NOSTART = 0x08;
    }
}

///
/// The identifier for a bus: an index into the board's bus table.  Values
/// at or beyond the table length are a programming error.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Bus(pub u8);

impl Bus {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for Bus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "twim{}", self.0)
    }
}
