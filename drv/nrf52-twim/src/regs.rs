// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TWIM register map
//!
//! Offsets are relative to the instance base.  Registers are never touched
//! through pointers: every access goes through [`RegisterIo`], which on the
//! target is a call into the supervisor.

use crate::kernel::RegisterIo;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum Reg {
    TasksStartRx = 0x000,
    TasksStartTx = 0x008,
    TasksStop = 0x014,
    EventsStopped = 0x104,
    EventsError = 0x124,
    EventsLastRx = 0x15c,
    EventsLastTx = 0x160,
    Shorts = 0x200,
    Inten = 0x300,
    IntenSet = 0x304,
    IntenClr = 0x308,
    ErrorSrc = 0x4c4,
    Enable = 0x500,
    PselScl = 0x508,
    PselSda = 0x50c,
    Frequency = 0x524,
    RxdPtr = 0x534,
    RxdMaxCnt = 0x538,
    RxdAmount = 0x53c,
    TxdPtr = 0x544,
    TxdMaxCnt = 0x548,
    TxdAmount = 0x54c,
    Address = 0x588,
}

impl Reg {
    pub const fn offset(self) -> u32 {
        self as u32
    }

    pub fn from_offset(offset: u32) -> Option<Self> {
        Self::from_u32(offset)
    }
}

/// Value of `ENABLE` selecting the TWIM (master, EasyDMA) function.
pub const ENABLE_ENABLED: u32 = 6;
pub const ENABLE_DISABLED: u32 = 0;

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Shorts: u32 {
        const LASTTX_STARTRX = 1 << 7;
        const LASTTX_SUSPEND = 1 << 8;
        const LASTTX_STOP = 1 << 9;
        const LASTRX_STARTTX = 1 << 10;
        const LASTRX_STOP = 1 << 12;
    }

    /// Bits shared by `INTEN`, `INTENSET` and `INTENCLR`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Inten: u32 {
        const STOPPED = 1 << 1;
        const ERROR = 1 << 9;
        const LASTRX = 1 << 23;
        const LASTTX = 1 << 24;
    }

    /// `ERRORSRC`; bits are cleared by writing 1.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct ErrorSrc: u32 {
        const OVERRUN = 1 << 0;
        const ANACK = 1 << 1;
        const DNACK = 1 << 2;
    }
}

/// One TWIM instance, as seen through the privileged accessors.
pub(crate) struct Regs<'a, P: ?Sized> {
    io: &'a P,
    base: u32,
}

impl<'a, P: RegisterIo + ?Sized> Regs<'a, P> {
    pub(crate) fn new(io: &'a P, base: u32) -> Self {
        Self { io, base }
    }

    pub(crate) fn read(&self, reg: Reg) -> u32 {
        self.io.read(self.base + reg.offset())
    }

    pub(crate) fn write(&self, reg: Reg, value: u32) {
        self.io.write(self.base + reg.offset(), value)
    }

    /// Whether an `EVENTS_*` register is latched.
    pub(crate) fn event(&self, reg: Reg) -> bool {
        self.read(reg) != 0
    }
}
