// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A driver for the nRF52 TWIM: the I2C master with EasyDMA.
//!
//! The TWIM moves a whole transfer by DMA and reports only its end, through
//! events that raise an interrupt.  This driver turns that into blocking
//! calls: the caller programs a transfer, arms the interrupt, and sleeps on
//! a per-bus [`Completion`] until [`Twim::handle_irq`] posts it.
//!
//! The hardware shapes what is possible:
//!
//! - Only one DMA direction is active at a time, and going from a write to
//!   another write (or a read to a read) always produces a repeated START.
//!   A register selector and its payload must therefore go out as one
//!   contiguous transmit buffer, which is why register writes are staged.
//!   Suppressing the START is never possible.
//! - `LASTRX` fires as the last byte *starts* arriving, too early to know
//!   the data is in memory, so reads always end with a STOP.
//! - `LASTTX` likewise fires as the last byte starts going out.  A write
//!   without STOP takes the interrupt and then polls `TXD.AMOUNT` until the
//!   byte is really gone.
//!
//! Every register access is a call into the supervisor (see
//! [`kernel::RegisterIo`]), so the driver reads each register only when it
//! needs the value.

#![cfg_attr(target_os = "none", no_std)]

pub mod config;
pub mod device;
pub mod hal;
pub mod kernel;
pub mod regs;
pub mod signal;
pub mod staging;

include!(concat!(env!("OUT_DIR"), "/twim_config.rs"));

pub use config::{BusConfig, Frequency, Pin, SharedPeripheral};
pub use device::I2cDevice;
pub use drv_i2c_types::{Bus, Flags, ResponseCode};
pub use hal::TwimBus;
pub use signal::{BinaryLock, Completion, DefaultLock, SpinLock};
pub use staging::{StagingBuffer, STAGING_LEN};
pub use twim_config::{BUSES, NBUSES};

#[cfg(not(target_os = "none"))]
pub use signal::CondvarLock;

use kernel::{PinMode, Platform};
use regs::{ErrorSrc, Inten, Reg, Regs, Shorts, ENABLE_DISABLED, ENABLE_ENABLED};
use ringbuf::*;
use static_assertions::const_assert;

/// Number of TWIM instances on the part.
pub const MAX_BUSES: usize = 2;

/// Longest transfer in either direction (`MAXCNT` is 8 bits wide).
pub const MAX_LEN: usize = 255;

/// Longest payload of a register write: it has to fit in the staging buffer
/// behind a selector of up to two bytes.
pub const MAX_REG_WRITE_LEN: usize = 252;

const_assert!(MAX_LEN < STAGING_LEN);
const_assert!(MAX_REG_WRITE_LEN + 2 < STAGING_LEN);

/// Laps of the post-`LASTTX` poll before we stop waiting for `TXD.AMOUNT`.
/// The last byte takes under 100us at 100 kHz; a lap is at least one
/// supervisor call, so this is generous.
pub const LASTTX_SPIN_LIMIT: u32 = 10_000;

/// The kinds of transfer, for flag validation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    Write,
    WriteReg,
    Read,
    ReadReg,
    WriteRead,
}

impl Operation {
    /// Flags this kind of transfer cannot honor.  Only a plain write may
    /// leave the bus open at the end.
    pub const fn unsupported(self) -> Flags {
        match self {
            Operation::Write => Flags::NOSTART.union(Flags::ADDR10),
            Operation::WriteReg
            | Operation::Read
            | Operation::ReadReg
            | Operation::WriteRead => Flags::NOSTART
                .union(Flags::ADDR10)
                .union(Flags::NOSTOP),
        }
    }

    pub fn check(self, flags: Flags) -> Result<(), ResponseCode> {
        if flags.intersects(self.unsupported()) {
            Err(ResponseCode::OperationNotSupported)
        } else {
            Ok(())
        }
    }
}

///
/// A register selector as it goes on the wire: one byte, or two bytes MSB
/// first if [`Flags::REG16`] is set.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Selector {
    bytes: [u8; 2],
    len: usize,
}

impl Selector {
    pub fn new(reg: u16, flags: Flags) -> Self {
        if flags.contains(Flags::REG16) {
            Self {
                bytes: reg.to_be_bytes(),
                len: 2,
            }
        } else {
            Self {
                bytes: [reg as u8, 0],
                len: 1,
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// What ends a transfer successfully.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Until {
    /// The STOP condition, reached through a short.
    Stopped,
    /// The last of this many bytes has left, with the bus still held.
    LastTx(u32),
}

impl Until {
    fn source(self) -> Inten {
        match self {
            Until::Stopped => Inten::STOPPED,
            Until::LastTx(_) => Inten::LASTTX,
        }
    }
}

/// Driver events, recorded in the trace ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Init(Bus),
    Acquire(Bus),
    Release(Bus),
    PinsAttached(Bus),
    PinsDetached(Bus),
    Rejected(Bus, Operation, u8),
    Write { bus: Bus, addr: u8, len: u8, stop: bool },
    Read { bus: Bus, addr: u8, len: u8 },
    WriteRead { bus: Bus, addr: u8, wlen: u8, rlen: u8 },
    Staged(Bus, u8),
    Wait(Bus, Until),
    Stopped(Bus),
    LastTx { bus: Bus, laps: u32 },
    LastTxGaveUp(Bus),
    AddrNack(Bus),
    DataNack(Bus),
    UnclassifiedError(Bus, u32),
    Irq(Bus),
}

pub const TRACE_DEPTH: usize = 64;

ringbuf!(Trace, TRACE_DEPTH, Trace::None);

/// A copy of the trace ring buffer.  On the target it is read with a
/// debugger instead.
#[cfg(not(target_os = "none"))]
pub fn trace() -> ringbuf::Entries<Trace, TRACE_DEPTH> {
    __RINGBUF.snapshot()
}

fn check_address(addr: u8) {
    assert!(addr < 0x80, "I2C address {addr:#x} is not 7 bits");
}

///
/// The transaction engine for up to [`MAX_BUSES`] TWIM instances.
///
/// All operations take `&self`: one engine is shared by every thread using
/// any of its buses, and by the interrupt path.  Callers bracket their
/// transfers on a bus with [`acquire`](Twim::acquire) and
/// [`release`](Twim::release); the engine relies on that and does not
/// check it.
///
pub struct Twim<'a, P, L, const N: usize> {
    platform: &'a P,
    buses: &'a [BusConfig; N],
    staging: &'a StagingBuffer<L>,
    done: [Completion<L>; N],
    #[cfg(feature = "reconfigure")]
    pins: [L; N],
}

impl<'a, P: Platform, L: BinaryLock, const N: usize> Twim<'a, P, L, N> {
    pub fn new(
        platform: &'a P,
        buses: &'a [BusConfig; N],
        staging: &'a StagingBuffer<L>,
    ) -> Self {
        assert!(N <= MAX_BUSES, "{N} buses configured, part has {MAX_BUSES}");

        Self {
            platform,
            buses,
            staging,
            done: core::array::from_fn(|_| Completion::new()),
            #[cfg(feature = "reconfigure")]
            pins: core::array::from_fn(|_| L::new(false)),
        }
    }

    fn config(&self, bus: Bus) -> &'a BusConfig {
        let buses: &'a [BusConfig; N] = self.buses;
        match buses.get(bus.index()) {
            Some(config) => config,
            None => panic!("{bus} is not configured ({N} buses)"),
        }
    }

    fn regs(&self, config: &BusConfig) -> Regs<'a, P> {
        Regs::new(self.platform, config.base)
    }

    fn check(
        &self,
        bus: Bus,
        op: Operation,
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        if let Err(code) = op.check(flags) {
            ringbuf_entry!(Trace::Rejected(bus, op, flags.bits()));
            return Err(code);
        }
        Ok(())
    }

    fn dma(&self, ptr: *const u8, len: usize) -> u32 {
        match self.platform.dma_address(ptr, len) {
            Some(addr) => addr,
            None => panic!("{len} bytes at {ptr:p} are out of EasyDMA reach"),
        }
    }

    fn attach_pins(&self, config: &BusConfig) {
        self.platform
            .configure_pin(config.scl, PinMode::InputOpenDrainPullUp);
        self.platform
            .configure_pin(config.sda, PinMode::InputOpenDrainPullUp);
    }

    ///
    /// Brings up a bus: idle-state pins, the shared registers, and the
    /// interrupt route.  The peripheral is left enabled.
    ///
    pub fn init(&self, bus: Bus) {
        let config = self.config(bus);
        let regs = self.regs(config);

        self.done[bus.index()].reset();

        regs.write(Reg::Enable, ENABLE_DISABLED);
        self.attach_pins(config);
        config.shared().program(self.platform, config.base);
        self.platform.register_irq(config.base, bus);
        regs.write(Reg::Enable, ENABLE_ENABLED);

        ringbuf_entry!(Trace::Init(bus));
    }

    ///
    /// Starts a period of use of `bus`.  Another role of the same instance
    /// may have run since our last [`release`](Twim::release), so the
    /// interrupt route and the shared registers are claimed afresh.
    ///
    pub fn acquire(&self, bus: Bus) {
        let config = self.config(bus);

        #[cfg(feature = "reconfigure")]
        self.pins[bus.index()].lock();

        self.platform.register_irq(config.base, bus);
        config.shared().program(self.platform, config.base);
        self.regs(config).write(Reg::Enable, ENABLE_ENABLED);

        ringbuf_entry!(Trace::Acquire(bus));
    }

    pub fn release(&self, bus: Bus) {
        let config = self.config(bus);

        self.regs(config).write(Reg::Enable, ENABLE_DISABLED);

        #[cfg(feature = "reconfigure")]
        self.pins[bus.index()].unlock();

        self.platform.release_irq(config.base);

        ringbuf_entry!(Trace::Release(bus));
    }

    /// Hands the pins back to this bus after [`deinit_pins`](Twim::deinit_pins),
    /// letting pending and future [`acquire`](Twim::acquire)s through.
    #[cfg(feature = "reconfigure")]
    pub fn init_pins(&self, bus: Bus) {
        let config = self.config(bus);

        self.attach_pins(config);
        self.regs(config).write(Reg::Enable, ENABLE_ENABLED);
        self.pins[bus.index()].unlock();

        ringbuf_entry!(Trace::PinsAttached(bus));
    }

    /// Detaches the bus from its pins so they can be used for something
    /// else.  Waits for the current holder to release the bus, and keeps
    /// it from being acquired until [`init_pins`](Twim::init_pins).
    #[cfg(feature = "reconfigure")]
    pub fn deinit_pins(&self, bus: Bus) {
        let config = self.config(bus);

        self.pins[bus.index()].lock();
        self.regs(config).write(Reg::Enable, ENABLE_DISABLED);

        ringbuf_entry!(Trace::PinsDetached(bus));
    }

    ///
    /// The interrupt handler.  `bus` is the context given to
    /// [`Platform::register_irq`].  Masks everything a transfer may have
    /// armed and wakes the waiter, which does the actual work.
    ///
    pub fn handle_irq(&self, bus: Bus) {
        let config = self.config(bus);

        self.regs(config).write(
            Reg::IntenClr,
            (Inten::STOPPED | Inten::ERROR | Inten::LASTTX).bits(),
        );
        ringbuf_entry!(Trace::Irq(bus));

        self.done[bus.index()].post();
    }

    ///
    /// Writes `data` to `addr`.  With [`Flags::NOSTOP`] the bus is held
    /// afterwards, and the next transfer begins with a repeated START.
    ///
    /// # Panics
    ///
    /// If `data` is empty or longer than [`MAX_LEN`], or `addr` is not a
    /// 7-bit address.
    ///
    pub fn write(
        &self,
        bus: Bus,
        addr: u8,
        data: &[u8],
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        self.check(bus, Operation::Write, flags)?;

        let config = self.config(bus);
        check_address(addr);
        assert!(
            !data.is_empty() && data.len() <= MAX_LEN,
            "write of {} bytes",
            data.len()
        );

        match self.platform.dma_address(data.as_ptr(), data.len()) {
            Some(tx) => {
                self.direct_write(bus, config, addr, tx, data.len(), flags)
            }
            None => {
                let mut staged = self.staging.checkout();
                staged[..data.len()].copy_from_slice(data);
                ringbuf_entry!(Trace::Staged(bus, data.len() as u8));

                let tx = self.dma(staged.as_ptr(), data.len());
                self.direct_write(bus, config, addr, tx, data.len(), flags)
            }
        }
    }

    ///
    /// Writes a register selector followed by `data`, as one transfer.
    ///
    /// # Panics
    ///
    /// If `data` is empty or longer than [`MAX_REG_WRITE_LEN`], or `addr`
    /// is not a 7-bit address.
    ///
    pub fn write_with_register(
        &self,
        bus: Bus,
        addr: u8,
        reg: u16,
        data: &[u8],
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        self.check(bus, Operation::WriteReg, flags)?;

        let config = self.config(bus);
        check_address(addr);
        assert!(
            !data.is_empty() && data.len() <= MAX_REG_WRITE_LEN,
            "register write of {} bytes",
            data.len()
        );

        let selector = Selector::new(reg, flags);
        let selector = selector.as_bytes();
        let len = selector.len() + data.len();

        let mut staged = self.staging.checkout();
        staged[..selector.len()].copy_from_slice(selector);
        staged[selector.len()..len].copy_from_slice(data);
        ringbuf_entry!(Trace::Staged(bus, len as u8));

        let tx = self.dma(staged.as_ptr(), len);
        self.direct_write(bus, config, addr, tx, len, flags)
    }

    ///
    /// Reads `buf.len()` bytes from `addr`, ending with a STOP.
    ///
    /// # Panics
    ///
    /// If `buf` is empty, longer than [`MAX_LEN`], or outside EasyDMA reach,
    /// or if `addr` is not a 7-bit address.
    ///
    pub fn read(
        &self,
        bus: Bus,
        addr: u8,
        buf: &mut [u8],
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        self.check(bus, Operation::Read, flags)?;

        let config = self.config(bus);
        check_address(addr);
        assert!(
            !buf.is_empty() && buf.len() <= MAX_LEN,
            "read of {} bytes",
            buf.len()
        );

        let len = buf.len();
        ringbuf_entry!(Trace::Read {
            bus,
            addr,
            len: len as u8
        });

        let rx = self.dma(buf.as_mut_ptr().cast_const(), len);
        let regs = self.regs(config);

        regs.write(Reg::Address, addr.into());
        regs.write(Reg::RxdPtr, rx);
        regs.write(Reg::RxdMaxCnt, len as u32);
        regs.write(Reg::Shorts, Shorts::LASTRX_STOP.bits());
        regs.write(Reg::TasksStartRx, 1);

        self.finish(bus, &regs, Until::Stopped)
    }

    ///
    /// Reads `buf.len()` bytes from register `reg` of `addr`: the selector
    /// is written, then the read follows after a repeated START, with a
    /// single STOP at the end.
    ///
    /// # Panics
    ///
    /// As for [`read`](Twim::read).
    ///
    pub fn read_with_register(
        &self,
        bus: Bus,
        addr: u8,
        reg: u16,
        buf: &mut [u8],
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        self.check(bus, Operation::ReadReg, flags)?;

        let selector = Selector::new(reg, flags);
        self.transfer(bus, addr, selector.as_bytes(), buf)
    }

    ///
    /// Writes `wbuf` and then, after a repeated START, reads into `rbuf`.
    /// `wbuf` is staged if it is outside EasyDMA reach.
    ///
    /// # Panics
    ///
    /// If either buffer is empty or longer than [`MAX_LEN`], if `rbuf` is
    /// outside EasyDMA reach, or if `addr` is not a 7-bit address.
    ///
    pub fn write_read(
        &self,
        bus: Bus,
        addr: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        self.check(bus, Operation::WriteRead, flags)?;
        self.transfer(bus, addr, wbuf, rbuf)
    }

    pub fn read_byte(
        &self,
        bus: Bus,
        addr: u8,
        flags: Flags,
    ) -> Result<u8, ResponseCode> {
        let mut byte = [0];
        self.read(bus, addr, &mut byte, flags)?;
        Ok(byte[0])
    }

    pub fn write_byte(
        &self,
        bus: Bus,
        addr: u8,
        byte: u8,
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        self.write(bus, addr, &[byte], flags)
    }

    pub fn read_reg(
        &self,
        bus: Bus,
        addr: u8,
        reg: u16,
        flags: Flags,
    ) -> Result<u8, ResponseCode> {
        let mut byte = [0];
        self.read_with_register(bus, addr, reg, &mut byte, flags)?;
        Ok(byte[0])
    }

    pub fn write_reg(
        &self,
        bus: Bus,
        addr: u8,
        reg: u16,
        value: u8,
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        self.write_with_register(bus, addr, reg, &[value], flags)
    }

    /// A handle on one device of `bus`.
    pub fn device(&self, bus: Bus, address: u8) -> I2cDevice<'_, 'a, P, L, N> {
        I2cDevice::new(self, bus, address)
    }

    /// An `embedded-hal` view of `bus`.
    pub fn bus(&self, bus: Bus) -> TwimBus<'_, 'a, P, L, N> {
        TwimBus::new(self, bus)
    }

    fn transfer(
        &self,
        bus: Bus,
        addr: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), ResponseCode> {
        let config = self.config(bus);
        check_address(addr);
        assert!(
            !wbuf.is_empty() && wbuf.len() <= MAX_LEN,
            "write of {} bytes",
            wbuf.len()
        );
        assert!(
            !rbuf.is_empty() && rbuf.len() <= MAX_LEN,
            "read of {} bytes",
            rbuf.len()
        );

        match self.platform.dma_address(wbuf.as_ptr(), wbuf.len()) {
            Some(tx) => {
                self.direct_write_read(bus, config, addr, tx, wbuf.len(), rbuf)
            }
            None => {
                let mut staged = self.staging.checkout();
                staged[..wbuf.len()].copy_from_slice(wbuf);
                ringbuf_entry!(Trace::Staged(bus, wbuf.len() as u8));

                let tx = self.dma(staged.as_ptr(), wbuf.len());
                self.direct_write_read(bus, config, addr, tx, wbuf.len(), rbuf)
            }
        }
    }

    fn direct_write(
        &self,
        bus: Bus,
        config: &BusConfig,
        addr: u8,
        tx: u32,
        len: usize,
        flags: Flags,
    ) -> Result<(), ResponseCode> {
        let stop = !flags.contains(Flags::NOSTOP);
        ringbuf_entry!(Trace::Write {
            bus,
            addr,
            len: len as u8,
            stop
        });

        let regs = self.regs(config);

        regs.write(Reg::Address, addr.into());
        regs.write(Reg::TxdPtr, tx);
        regs.write(Reg::TxdMaxCnt, len as u32);

        let until = if stop {
            regs.write(Reg::Shorts, Shorts::LASTTX_STOP.bits());
            Until::Stopped
        } else {
            regs.write(Reg::Shorts, 0);
            // A LASTTX left over from an earlier transfer would satisfy
            // this one's wait before it has started.
            regs.write(Reg::EventsLastTx, 0);
            Until::LastTx(len as u32)
        };

        regs.write(Reg::TasksStartTx, 1);

        self.finish(bus, &regs, until)
    }

    fn direct_write_read(
        &self,
        bus: Bus,
        config: &BusConfig,
        addr: u8,
        tx: u32,
        wlen: usize,
        rbuf: &mut [u8],
    ) -> Result<(), ResponseCode> {
        let rlen = rbuf.len();
        ringbuf_entry!(Trace::WriteRead {
            bus,
            addr,
            wlen: wlen as u8,
            rlen: rlen as u8
        });

        let rx = self.dma(rbuf.as_mut_ptr().cast_const(), rlen);
        let regs = self.regs(config);

        regs.write(Reg::Address, addr.into());
        regs.write(Reg::TxdPtr, tx);
        regs.write(Reg::TxdMaxCnt, wlen as u32);
        regs.write(Reg::RxdPtr, rx);
        regs.write(Reg::RxdMaxCnt, rlen as u32);
        regs.write(
            Reg::Shorts,
            (Shorts::LASTTX_STARTRX | Shorts::LASTRX_STOP).bits(),
        );
        regs.write(Reg::TasksStartTx, 1);

        self.finish(bus, &regs, Until::Stopped)
    }

    ///
    /// Waits for the transfer that was just started to end, and works out
    /// how it ended.
    ///
    fn finish(
        &self,
        bus: Bus,
        regs: &Regs<'a, P>,
        until: Until,
    ) -> Result<(), ResponseCode> {
        let done = &self.done[bus.index()];

        // Nothing is armed yet, so the only post this can discard is a
        // stale one.
        done.reset();
        regs.write(Reg::IntenSet, (until.source() | Inten::ERROR).bits());
        ringbuf_entry!(Trace::Wait(bus, until));

        done.wait();

        if regs.event(Reg::EventsStopped) {
            regs.write(Reg::EventsStopped, 0);
            ringbuf_entry!(Trace::Stopped(bus));
        }

        if let Until::LastTx(count) = until {
            // LASTTX was raised as the final byte started out.  Until it is
            // gone, a following STARTTX or STARTRX would cut it off.
            let mut laps = 0;
            while regs.read(Reg::TxdAmount) != count
                && !regs.event(Reg::EventsError)
            {
                laps += 1;
                if laps == LASTTX_SPIN_LIMIT {
                    ringbuf_entry!(Trace::LastTxGaveUp(bus));
                    break;
                }
                core::hint::spin_loop();
            }
            ringbuf_entry!(Trace::LastTx { bus, laps });
        }

        if regs.event(Reg::EventsError) {
            regs.write(Reg::EventsError, 0);

            let src = ErrorSrc::from_bits_retain(regs.read(Reg::ErrorSrc));

            if src.contains(ErrorSrc::ANACK) {
                regs.write(Reg::ErrorSrc, ErrorSrc::ANACK.bits());
                ringbuf_entry!(Trace::AddrNack(bus));
                return Err(ResponseCode::NoDevice);
            }

            if src.contains(ErrorSrc::DNACK) {
                regs.write(Reg::ErrorSrc, ErrorSrc::DNACK.bits());
                ringbuf_entry!(Trace::DataNack(bus));
                return Err(ResponseCode::NoRegister);
            }

            regs.write(Reg::ErrorSrc, src.bits());
            ringbuf_entry!(Trace::UnclassifiedError(bus, src.bits()));
        }

        Ok(())
    }
}
