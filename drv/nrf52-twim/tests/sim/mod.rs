// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A register-level TWIM simulator.
//!
//! Register writes trigger tasks against simulated devices, events latch,
//! and an interrupt is raised whenever an enabled event becomes pending.
//! Interrupts are queued to a thread that calls the engine's handler, the
//! way a real core would preempt the waiting thread.  Everything the
//! devices see on the wire is logged per bus.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use drv_nrf52_twim::kernel::{PinMode, Platform, RegisterIo};
use drv_nrf52_twim::regs::{ErrorSrc, Inten, Reg, Shorts, ENABLE_ENABLED};
use drv_nrf52_twim::{
    BinaryLock, Bus, BusConfig, CondvarLock, Frequency, Pin, StagingBuffer,
    Twim,
};

pub const TWIM0: u32 = 0x4000_3000;
pub const TWIM1: u32 = 0x4000_4000;

pub fn buses() -> [BusConfig; 2] {
    [
        BusConfig {
            base: TWIM0,
            scl: Pin::new(0, 26),
            sda: Pin::new(0, 27),
            frequency: Frequency::K400,
        },
        BusConfig {
            base: TWIM1,
            scl: Pin::new(0, 28),
            sda: Pin::new(0, 29),
            frequency: Frequency::K100,
        },
    ]
}

pub fn base(bus: Bus) -> u32 {
    buses()[bus.index()].base
}

/// What happened on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Cond {
    Start,
    Restart,
    Addr { addr: u8, read: bool },
    Tx(Vec<u8>),
    Rx(Vec<u8>),
    Nack,
    Stop,
}

///
/// A simple register-file device: the first one or two bytes of a write
/// set the register pointer, the remaining bytes are stored from there on,
/// and reads return bytes from the pointer on.
///
/// An [`echo`](Device::echo) device has no pointer: reads return the last
/// write, repeated as needed.
///
#[derive(Clone, Debug)]
pub struct Device {
    pub mem: Vec<u8>,
    pub reg16: bool,
    pub pointer: usize,
    /// NACK the byte at this index of any write.
    pub nack_byte: Option<usize>,
    pub echo: bool,
    /// Every write that was fully acknowledged, as sent, including the bare
    /// selectors that precede register reads.
    pub writes: Vec<Vec<u8>>,
}

impl Device {
    pub fn new() -> Self {
        Self {
            mem: (0..=255).collect(),
            reg16: false,
            pointer: 0,
            nack_byte: None,
            echo: false,
            writes: vec![],
        }
    }

    pub fn reg16() -> Self {
        Self {
            reg16: true,
            ..Self::new()
        }
    }

    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    fn ptr_len(&self) -> usize {
        if self.reg16 {
            2
        } else {
            1
        }
    }

    /// Returns how many bytes were acknowledged.
    fn write(&mut self, bytes: &[u8]) -> usize {
        if let Some(nack) = self.nack_byte {
            if nack < bytes.len() {
                return nack;
            }
        }

        let n = self.ptr_len();
        if self.echo {
            self.mem = bytes.to_vec();
            self.pointer = 0;
        } else if bytes.len() >= n {
            self.pointer = bytes[..n]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
                % self.mem.len();
            for &b in &bytes[n..] {
                self.mem[self.pointer] = b;
                self.pointer = (self.pointer + 1) % self.mem.len();
            }
        }

        self.writes.push(bytes.to_vec());
        bytes.len()
    }

    fn read(&mut self, len: usize) -> Vec<u8> {
        if self.echo {
            self.pointer = 0;
        }
        (0..len)
            .map(|_| {
                let b = self.mem[self.pointer];
                self.pointer = (self.pointer + 1) % self.mem.len();
                b
            })
            .collect()
    }
}

#[derive(Default)]
struct Periph {
    enable: u32,
    psel_scl: u32,
    psel_sda: u32,
    frequency: u32,
    address: u32,
    shorts: u32,
    inten: u32,
    stopped: u32,
    error: u32,
    lastrx: u32,
    lasttx: u32,
    errorsrc: u32,
    txd_ptr: u32,
    txd_maxcnt: u32,
    txd_amount: u32,
    rxd_ptr: u32,
    rxd_maxcnt: u32,
    rxd_amount: u32,

    /// Reads of TXD.AMOUNT left before it shows the final count.
    amount_lag: u32,
    /// `ERRORSRC` bits to raise at the end of the next transfer.
    pending_error: u32,
    bus_open: bool,
    irq_level: bool,
}

#[derive(Default)]
struct State {
    periphs: BTreeMap<u32, Periph>,
    devices: HashMap<(u32, u8), Device>,
    log: HashMap<u32, Vec<Cond>>,
    handles: HashMap<u32, usize>,
    next_handle: u32,
    not_dma: Vec<(usize, usize)>,
    irq_owner: HashMap<u32, Bus>,
    pins: Vec<(Pin, PinMode)>,
    accesses: usize,
    lasttx_lag: u32,
    irqs: VecDeque<Bus>,
    shutdown: bool,
}

type WriteHook = Box<dyn Fn(u32, Reg) + Send>;

pub struct Sim {
    state: Mutex<State>,
    irq: Condvar,
    hook: Mutex<Option<WriteHook>>,
}

fn split(addr: u32) -> (u32, Reg) {
    let base = addr & !0xfff;
    match Reg::from_offset(addr & 0xfff) {
        Some(reg) => (base, reg),
        None => panic!("access to unmodelled register {addr:#x}"),
    }
}

impl Sim {
    pub fn new(bases: &[u32]) -> Self {
        let state = State {
            periphs: bases.iter().map(|&b| (b, Periph::default())).collect(),
            next_handle: 0x2000_0000,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            irq: Condvar::new(),
            hook: Mutex::new(None),
        }
    }

    /// A simulator with both TWIM instances of [`buses`].
    pub fn both() -> Self {
        Self::new(&[TWIM0, TWIM1])
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not take the interrupt thread (or the
        // teardown) down with it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, base: u32, addr: u8, device: Device) {
        self.state().devices.insert((base, addr), device);
    }

    pub fn device(&self, base: u32, addr: u8) -> Device {
        self.state().devices[&(base, addr)].clone()
    }

    pub fn log(&self, base: u32) -> Vec<Cond> {
        self.state().log.get(&base).cloned().unwrap_or_default()
    }

    pub fn clear_log(&self, base: u32) {
        self.state().log.remove(&base);
    }

    /// Number of calls made into the platform so far.
    pub fn accesses(&self) -> usize {
        self.state().accesses
    }

    /// Calls `hook` with the instance and register of every register write,
    /// before the write takes effect.
    pub fn on_write(&self, hook: impl Fn(u32, Reg) + Send + 'static) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Box::new(hook));
    }

    /// Makes the next transfer on `base` that gets through addressing end
    /// with `ERROR` latched and `src` in `ERRORSRC`.
    pub fn inject_error(&self, base: u32, src: ErrorSrc) {
        self.state().periphs.get_mut(&base).unwrap().pending_error |= src.bits();
    }

    /// Reads of `TXD.AMOUNT` still owed before it shows the final count.
    pub fn lasttx_lag_left(&self, base: u32) -> u32 {
        self.state().periphs[&base].amount_lag
    }

    pub fn set_lasttx_lag(&self, reads: u32) {
        self.state().lasttx_lag = reads;
    }

    /// Makes `bytes` unreachable for DMA, as if it were in flash.
    pub fn mark_not_dma(&self, bytes: &[u8]) {
        let start = bytes.as_ptr() as usize;
        self.state().not_dma.push((start, start + bytes.len()));
    }

    pub fn pins(&self) -> Vec<(Pin, PinMode)> {
        self.state().pins.clone()
    }

    pub fn irq_owner(&self, base: u32) -> Option<Bus> {
        self.state().irq_owner.get(&base).copied()
    }

    /// Register contents as the hardware holds them, without counting as an
    /// access.
    pub fn peek(&self, base: u32, reg: Reg) -> u32 {
        value(&self.state().periphs[&base], reg)
    }

    /// Overwrites the registers shared with the SPI roles, as another
    /// driver using the instance would.
    pub fn clobber_shared(&self, base: u32) {
        let mut state = self.state();
        let p = state.periphs.get_mut(&base).unwrap();
        p.psel_scl = 0xffff_ffff;
        p.psel_sda = 0xffff_ffff;
        p.frequency = 0x8000_0000;
    }

    /// Blocks until an interrupt is pending, or returns `None` once the
    /// simulator is shut down.
    pub fn next_irq(&self) -> Option<Bus> {
        let mut state = self.state();
        loop {
            if let Some(bus) = state.irqs.pop_front() {
                return Some(bus);
            }
            if state.shutdown {
                return None;
            }
            state = self
                .irq
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.irq.notify_all();
    }

    fn update_irq(&self, state: &mut State, base: u32) {
        let p = state.periphs.get_mut(&base).unwrap();
        let inten = Inten::from_bits_retain(p.inten);
        let level = (p.stopped != 0 && inten.contains(Inten::STOPPED))
            || (p.error != 0 && inten.contains(Inten::ERROR))
            || (p.lasttx != 0 && inten.contains(Inten::LASTTX))
            || (p.lastrx != 0 && inten.contains(Inten::LASTRX));
        let rising = level && !p.irq_level;
        p.irq_level = level;

        if rising {
            let Some(&bus) = state.irq_owner.get(&base) else {
                panic!("interrupt from {base:#x} with no handler");
            };
            state.irqs.push_back(bus);
            self.irq.notify_all();
        }
    }
}

fn value(p: &Periph, reg: Reg) -> u32 {
    match reg {
        Reg::Enable => p.enable,
        Reg::PselScl => p.psel_scl,
        Reg::PselSda => p.psel_sda,
        Reg::Frequency => p.frequency,
        Reg::Address => p.address,
        Reg::Shorts => p.shorts,
        Reg::Inten | Reg::IntenSet | Reg::IntenClr => p.inten,
        Reg::EventsStopped => p.stopped,
        Reg::EventsError => p.error,
        Reg::EventsLastRx => p.lastrx,
        Reg::EventsLastTx => p.lasttx,
        Reg::ErrorSrc => p.errorsrc,
        Reg::TxdPtr => p.txd_ptr,
        Reg::TxdMaxCnt => p.txd_maxcnt,
        Reg::TxdAmount => p.txd_amount,
        Reg::RxdPtr => p.rxd_ptr,
        Reg::RxdMaxCnt => p.rxd_maxcnt,
        Reg::RxdAmount => p.rxd_amount,
        Reg::TasksStartRx | Reg::TasksStartTx | Reg::TasksStop => 0,
    }
}

fn cond(state: &mut State, base: u32, c: Cond) {
    state.log.entry(base).or_default().push(c);
}

fn stop(state: &mut State, base: u32) {
    cond(state, base, Cond::Stop);
    let p = state.periphs.get_mut(&base).unwrap();
    p.bus_open = false;
    p.stopped = 1;
}

fn nack(state: &mut State, base: u32, src: ErrorSrc) {
    cond(state, base, Cond::Nack);
    let p = state.periphs.get_mut(&base).unwrap();
    p.errorsrc |= src.bits();
    p.error = 1;
    stop(state, base);
}

fn raise_pending(p: &mut Periph) {
    if p.pending_error != 0 {
        p.errorsrc |= core::mem::take(&mut p.pending_error);
        p.error = 1;
    }
}

fn dma_ptr(state: &State, handle: u32) -> usize {
    match state.handles.get(&handle) {
        Some(&ptr) => ptr,
        None => panic!("DMA from unknown address {handle:#x}"),
    }
}

/// Opens the bus (or re-opens it with a repeated START) and addresses the
/// device.  Returns the device key if it acknowledged.
fn address(state: &mut State, base: u32, read: bool) -> Option<(u32, u8)> {
    let p = state.periphs.get_mut(&base).unwrap();
    assert_eq!(p.enable, ENABLE_ENABLED, "task triggered on disabled TWIM");
    let start = if p.bus_open { Cond::Restart } else { Cond::Start };
    p.bus_open = true;
    let addr = p.address as u8;

    cond(state, base, start);
    cond(state, base, Cond::Addr { addr, read });

    if state.devices.contains_key(&(base, addr)) {
        Some((base, addr))
    } else {
        nack(state, base, ErrorSrc::ANACK);
        None
    }
}

fn start_tx(state: &mut State, base: u32) {
    let Some(key) = address(state, base, false) else {
        return;
    };

    let p = &state.periphs[&base];
    let (handle, len) = (p.txd_ptr, p.txd_maxcnt as usize);
    let ptr = dma_ptr(state, handle);
    // Safety: the engine keeps the transmit buffer alive and unchanged until
    // the transfer it started has finished.
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) }
        .to_vec();

    let acked = state.devices.get_mut(&key).unwrap().write(&bytes);
    cond(state, base, Cond::Tx(bytes[..acked].to_vec()));

    if acked < bytes.len() {
        state.periphs.get_mut(&base).unwrap().txd_amount = acked as u32;
        nack(state, base, ErrorSrc::DNACK);
        return;
    }

    let lag = state.lasttx_lag;
    let p = state.periphs.get_mut(&base).unwrap();
    p.txd_amount = len as u32;
    p.lasttx = 1;
    raise_pending(p);

    let shorts = Shorts::from_bits_retain(p.shorts);
    if shorts.contains(Shorts::LASTTX_STOP) {
        stop(state, base);
    } else if shorts.contains(Shorts::LASTTX_STARTRX) {
        start_rx(state, base);
    } else {
        p.amount_lag = lag;
    }
}

fn start_rx(state: &mut State, base: u32) {
    let Some(key) = address(state, base, true) else {
        return;
    };

    let p = &state.periphs[&base];
    let (handle, len) = (p.rxd_ptr, p.rxd_maxcnt as usize);
    let ptr = dma_ptr(state, handle);

    let bytes = state.devices.get_mut(&key).unwrap().read(len);
    // Safety: the engine holds the receive buffer mutably borrowed until
    // the transfer it started has finished.
    unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, len) }
        .copy_from_slice(&bytes);
    cond(state, base, Cond::Rx(bytes));

    let p = state.periphs.get_mut(&base).unwrap();
    p.rxd_amount = len as u32;
    p.lastrx = 1;
    raise_pending(p);

    if Shorts::from_bits_retain(p.shorts).contains(Shorts::LASTRX_STOP) {
        stop(state, base);
    }
}

impl RegisterIo for Sim {
    fn read(&self, addr: u32) -> u32 {
        let (base, reg) = split(addr);
        let mut state = self.state();
        state.accesses += 1;

        let p = state.periphs.get_mut(&base).unwrap();
        match reg {
            Reg::TxdAmount if p.amount_lag > 0 => {
                p.amount_lag -= 1;
                p.txd_amount.saturating_sub(1)
            }
            _ => value(p, reg),
        }
    }

    fn write(&self, addr: u32, value: u32) {
        let (base, reg) = split(addr);
        if let Some(hook) =
            &*self.hook.lock().unwrap_or_else(PoisonError::into_inner)
        {
            hook(base, reg);
        }

        let mut state = self.state();
        state.accesses += 1;

        let p = state.periphs.get_mut(&base).unwrap();
        match reg {
            Reg::TasksStartTx => {
                if value != 0 {
                    start_tx(&mut state, base);
                }
            }
            Reg::TasksStartRx => {
                if value != 0 {
                    start_rx(&mut state, base);
                }
            }
            Reg::TasksStop => {
                if value != 0 && p.bus_open {
                    stop(&mut state, base);
                }
            }
            Reg::EventsStopped => p.stopped = value,
            Reg::EventsError => p.error = value,
            Reg::EventsLastRx => p.lastrx = value,
            Reg::EventsLastTx => p.lasttx = value,
            Reg::Shorts => p.shorts = value,
            Reg::Inten => p.inten = value,
            Reg::IntenSet => p.inten |= value,
            Reg::IntenClr => p.inten &= !value,
            Reg::ErrorSrc => p.errorsrc &= !value,
            Reg::Enable => p.enable = value,
            Reg::PselScl => p.psel_scl = value,
            Reg::PselSda => p.psel_sda = value,
            Reg::Frequency => p.frequency = value,
            Reg::Address => p.address = value,
            Reg::TxdPtr => p.txd_ptr = value,
            Reg::TxdMaxCnt => p.txd_maxcnt = value,
            Reg::RxdPtr => p.rxd_ptr = value,
            Reg::RxdMaxCnt => p.rxd_maxcnt = value,
            Reg::TxdAmount | Reg::RxdAmount => {
                panic!("write to read-only {reg:?}")
            }
        }

        self.update_irq(&mut state, base);
    }
}

impl Platform for Sim {
    fn configure_pin(&self, pin: Pin, mode: PinMode) {
        let mut state = self.state();
        state.accesses += 1;
        state.pins.push((pin, mode));
    }

    fn register_irq(&self, base: u32, bus: Bus) {
        let mut state = self.state();
        state.accesses += 1;
        state.irq_owner.insert(base, bus);
    }

    fn release_irq(&self, base: u32) {
        let mut state = self.state();
        state.accesses += 1;
        state.irq_owner.remove(&base);
    }

    fn dma_address(&self, ptr: *const u8, len: usize) -> Option<u32> {
        let mut state = self.state();
        state.accesses += 1;

        let start = ptr as usize;
        if state.not_dma.iter().any(|&(lo, hi)| start >= lo && start < hi) {
            return None;
        }

        let handle = state.next_handle;
        state.next_handle += 0x400;
        state.handles.insert(handle, start);
        assert!(len <= 0x400);
        Some(handle)
    }
}

struct Shutdown<'a>(&'a Sim);

impl Drop for Shutdown<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

///
/// Runs `f` with an interrupt thread delivering the simulator's interrupts
/// to `twim`.
///
pub fn with_irqs<L: BinaryLock, const N: usize, R>(
    sim: &Sim,
    twim: &Twim<'_, Sim, L, N>,
    f: impl FnOnce() -> R,
) -> R {
    std::thread::scope(|s| {
        s.spawn(|| {
            while let Some(bus) = sim.next_irq() {
                twim.handle_irq(bus);
            }
        });

        let _shutdown = Shutdown(sim);
        f()
    })
}

pub type Staging = StagingBuffer<CondvarLock>;
pub type TestTwim<'a> = Twim<'a, Sim, CondvarLock, 2>;

/// Brings up both buses and acquires them.
pub fn bring_up(twim: &TestTwim<'_>) {
    for bus in [Bus(0), Bus(1)] {
        twim.init(bus);
        twim.acquire(bus);
    }
}
