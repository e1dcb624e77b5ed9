//! Shared fakes for `tulip-pci` integration tests: an instrumented PCI fabric, a CSR-bank
//! controller and a loopback network backend.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use memory::{DenseMemory, MemoryBus, MmioHandler};
use net_backend::{
    MacAddr, NetBackend, NetBackendError, NetClient, NicEndpoint, NicInfo, QueueBackend,
};
use pci::{
    FabricError, IrqLine, PciBarDefinition, PciBdf, PciFabric, PciInterruptPin, PersistentStore,
    Timer, TimerCallback, VecStore,
};
use tulip_pci::{
    BusContext, DmaMemory, InitContext, InitError, TulipConfig, TulipController, TulipPciDevice,
};

pub const GUEST_RAM_SIZE: u64 = 0x1_0000;

// 21143 CSR offsets (CSRn lives at n * 8).
pub const CSR0: u32 = 0x00;
pub const CSR1: u32 = 0x08;
pub const CSR3: u32 = 0x18;
pub const CSR4: u32 = 0x20;
pub const CSR5: u32 = 0x28;
pub const CSR6: u32 = 0x30;
pub const CSR7: u32 = 0x38;
pub const CSR9: u32 = 0x48;
pub const CSR11: u32 = 0x58;
/// Scratch registers where the fake latches the station address on reset.
pub const MAC_LO: u32 = 0x70;
pub const MAC_HI: u32 = 0x74;

pub const CSR5_RI: u32 = 1 << 6;
pub const CSR5_GPT: u32 = 1 << 11;
pub const CSR6_SR: u32 = 1 << 1;
pub const SROM_WRITE: u32 = 1 << 31;

pub fn test_bdf() -> PciBdf {
    PciBdf::new(0, 3, 0)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub bars: usize,
    pub irq_allocs: usize,
    pub irq_frees: usize,
    pub timer_allocs: usize,
    pub timer_frees: usize,
    pub store_allocs: usize,
    pub store_frees: usize,
    pub dma_lookups: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Failures {
    pub bar: Option<u8>,
    pub irq: bool,
    pub dma: bool,
    pub timer: bool,
    pub store: bool,
}

struct TimerShared {
    deadline: Cell<Option<u64>>,
    alive: Cell<bool>,
}

struct FakeTimer {
    shared: Rc<TimerShared>,
    counters: Rc<RefCell<Counters>>,
}

impl Timer for FakeTimer {
    fn arm(&mut self, delay_ns: u64) {
        self.shared.deadline.set(Some(delay_ns));
    }

    fn cancel(&mut self) {
        self.shared.deadline.set(None);
    }

    fn is_armed(&self) -> bool {
        self.shared.deadline.get().is_some()
    }
}

impl Drop for FakeTimer {
    fn drop(&mut self) {
        self.shared.alive.set(false);
        self.shared.deadline.set(None);
        self.counters.borrow_mut().timer_frees += 1;
    }
}

struct FakeIrq {
    level: Rc<Cell<bool>>,
    transitions: Rc<Cell<usize>>,
    counters: Rc<RefCell<Counters>>,
}

impl IrqLine for FakeIrq {
    fn set_level(&mut self, level: bool) {
        self.level.set(level);
        self.transitions.set(self.transitions.get() + 1);
    }
}

impl Drop for FakeIrq {
    fn drop(&mut self) {
        self.counters.borrow_mut().irq_frees += 1;
    }
}

struct FakeStore {
    words: Rc<RefCell<VecStore>>,
    counters: Rc<RefCell<Counters>>,
}

impl PersistentStore for FakeStore {
    fn word_count(&self) -> usize {
        self.words.borrow().word_count()
    }

    fn read_word(&self, index: usize) -> u16 {
        self.words.borrow().read_word(index)
    }

    fn write_word(&mut self, index: usize, value: u16) {
        self.words.borrow_mut().write_word(index, value);
    }
}

impl Drop for FakeStore {
    fn drop(&mut self) {
        self.counters.borrow_mut().store_frees += 1;
    }
}

/// Single-function PCI fabric that records every allocation and release.
pub struct FakeFabric {
    pub fail: Failures,
    pub memory: Rc<RefCell<DenseMemory>>,
    counters: Rc<RefCell<Counters>>,
    bars: BTreeMap<u8, (PciBarDefinition, Box<dyn MmioHandler>)>,
    irq_level: Rc<Cell<bool>>,
    irq_transitions: Rc<Cell<usize>>,
    timers: Vec<(Rc<TimerShared>, TimerCallback)>,
    stores: Vec<Rc<RefCell<VecStore>>>,
}

impl FakeFabric {
    pub fn new() -> Self {
        Self {
            fail: Failures::default(),
            memory: Rc::new(RefCell::new(DenseMemory::new(GUEST_RAM_SIZE).unwrap())),
            counters: Rc::default(),
            bars: BTreeMap::new(),
            irq_level: Rc::default(),
            irq_transitions: Rc::default(),
            timers: Vec::new(),
            stores: Vec::new(),
        }
    }

    pub fn failing(fail: Failures) -> Self {
        Self {
            fail,
            ..Self::new()
        }
    }

    pub fn counters(&self) -> Counters {
        *self.counters.borrow()
    }

    pub fn bar_definition(&self, index: u8) -> Option<PciBarDefinition> {
        self.bars.get(&index).map(|(def, _)| *def)
    }

    pub fn bar_read(&mut self, index: u8, offset: u64, size: usize) -> u64 {
        let (_, handler) = self.bars.get_mut(&index).expect("BAR not registered");
        handler.read(offset, size)
    }

    pub fn bar_write(&mut self, index: u8, offset: u64, size: usize, value: u64) {
        let (_, handler) = self.bars.get_mut(&index).expect("BAR not registered");
        handler.write(offset, size, value);
    }

    pub fn csr_read(&mut self, index: u8, offset: u32) -> u32 {
        self.bar_read(index, u64::from(offset), 4) as u32
    }

    pub fn csr_write(&mut self, index: u8, offset: u32, value: u32) {
        self.bar_write(index, u64::from(offset), 4, u64::from(value));
    }

    pub fn irq_level(&self) -> bool {
        self.irq_level.get()
    }

    pub fn irq_transitions(&self) -> usize {
        self.irq_transitions.get()
    }

    /// Fires every armed, live timer once. Returns how many fired.
    pub fn fire_timers(&mut self) -> usize {
        let mut fired = 0;
        for (shared, callback) in self.timers.iter_mut() {
            if shared.alive.get() && shared.deadline.take().is_some() {
                callback();
                fired += 1;
            }
        }
        fired
    }

    pub fn timer_armed(&self) -> bool {
        self.timers
            .iter()
            .any(|(shared, _)| shared.alive.get() && shared.deadline.get().is_some())
    }

    pub fn store_words(&self) -> Option<Vec<u16>> {
        self.stores.last().map(|s| s.borrow().words().to_vec())
    }

    pub fn guest_write(&self, addr: u64, bytes: &[u8]) {
        self.memory.borrow_mut().write_physical(addr, bytes);
    }

    pub fn guest_read(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.memory.borrow_mut().read_physical(addr, &mut buf);
        buf
    }
}

impl PciFabric for FakeFabric {
    fn register_bar(
        &mut self,
        bdf: PciBdf,
        index: u8,
        def: PciBarDefinition,
        handler: Box<dyn MmioHandler>,
    ) -> Result<(), FabricError> {
        if self.fail.bar == Some(index) {
            return Err(FabricError::Exhausted("BAR address space"));
        }
        if self.bars.contains_key(&index) {
            return Err(FabricError::BarInUse { bdf, index });
        }
        self.bars.insert(index, (def, handler));
        self.counters.borrow_mut().bars += 1;
        Ok(())
    }

    fn allocate_irq(
        &mut self,
        bdf: PciBdf,
        pin: PciInterruptPin,
    ) -> Result<Box<dyn IrqLine>, FabricError> {
        assert_eq!(pin, PciInterruptPin::IntA);
        if self.fail.irq {
            return Err(FabricError::NoIrqAvailable { bdf });
        }
        self.counters.borrow_mut().irq_allocs += 1;
        Ok(Box::new(FakeIrq {
            level: self.irq_level.clone(),
            transitions: self.irq_transitions.clone(),
            counters: self.counters.clone(),
        }))
    }

    fn dma_address_space(
        &mut self,
        bdf: PciBdf,
    ) -> Result<Rc<RefCell<dyn MemoryBus>>, FabricError> {
        if self.fail.dma {
            return Err(FabricError::NoSuchFunction { bdf });
        }
        self.counters.borrow_mut().dma_lookups += 1;
        let space: Rc<RefCell<dyn MemoryBus>> = self.memory.clone();
        Ok(space)
    }

    fn new_timer(&mut self, callback: TimerCallback) -> Result<Box<dyn Timer>, FabricError> {
        if self.fail.timer {
            return Err(FabricError::Exhausted("timers"));
        }
        self.counters.borrow_mut().timer_allocs += 1;
        let shared = Rc::new(TimerShared {
            deadline: Cell::new(None),
            alive: Cell::new(true),
        });
        self.timers.push((shared.clone(), callback));
        Ok(Box::new(FakeTimer {
            shared,
            counters: self.counters.clone(),
        }))
    }

    fn allocate_persistent_store(
        &mut self,
        _bdf: PciBdf,
        initial: &[u16],
    ) -> Result<Box<dyn PersistentStore>, FabricError> {
        if self.fail.store {
            return Err(FabricError::Exhausted("persistent stores"));
        }
        self.counters.borrow_mut().store_allocs += 1;
        let words = Rc::new(RefCell::new(VecStore::new(initial)));
        self.stores.push(words.clone());
        Ok(Box::new(FakeStore {
            words,
            counters: self.counters.clone(),
        }))
    }
}

/// What the fake controller asks for during `init`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InitPlan {
    pub timer: bool,
    pub store: bool,
    pub timer_twice: bool,
    pub fail: bool,
}

impl InitPlan {
    pub fn full() -> Self {
        Self {
            timer: true,
            store: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct BankLog {
    pub inits: usize,
    pub resets: usize,
    pub cleanups: usize,
    pub timer_fires: usize,
    pub link: Vec<bool>,
    pub received: Vec<Vec<u8>>,
    pub reads: Vec<u32>,
    pub writes: Vec<(u32, u32)>,
    pub reset_macs: Vec<MacAddr>,
    /// `can_receive` / `receive` results seen by a loopback backend during transmit.
    pub loopback: Vec<(bool, usize)>,
}

/// Controller stand-in: a flat bank of 32 CSR slots plus just enough behaviour to exercise
/// every bus service.
///
/// - CSR1 write: transmit `value` bytes DMA'd from the CSR4 address.
/// - CSR3: receive buffer address; frames are DMA'd there while CSR6.SR is set.
/// - CSR7 write: interrupt enable mask; the IRQ level is `CSR5 & CSR7 != 0`.
/// - CSR9: SROM access. Writes select `(value >> 16) & 0x7FFF` and, with [`SROM_WRITE`] set,
///   store the low half there; reads return the selected word.
/// - CSR11 write: arm the timer for `value` ns.
pub struct BankController {
    pub regs: [u32; 32],
    pub log: Rc<RefCell<BankLog>>,
    pub plan: InitPlan,
    srom_index: usize,
}

impl BankController {
    pub fn new(plan: InitPlan) -> (Self, Rc<RefCell<BankLog>>) {
        let log = Rc::new(RefCell::new(BankLog::default()));
        (
            Self {
                regs: [0; 32],
                log: log.clone(),
                plan,
                srom_index: 0,
            },
            log,
        )
    }

    fn reg(&mut self, offset: u32) -> &mut u32 {
        &mut self.regs[(offset / 4) as usize]
    }

    fn update_irq(&mut self, bus: &mut BusContext<'_>) {
        let pending = *self.reg(CSR5) & *self.reg(CSR7) != 0;
        bus.set_irq_level(pending);
    }
}

/// SROM image: the station address in the first three words.
pub fn srom_image(mac: MacAddr) -> Vec<u16> {
    let o = mac.octets();
    let mut words = vec![0u16; 64];
    words[0] = u16::from_le_bytes([o[0], o[1]]);
    words[1] = u16::from_le_bytes([o[2], o[3]]);
    words[2] = u16::from_le_bytes([o[4], o[5]]);
    words
}

impl TulipController for BankController {
    fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), InitError> {
        self.log.borrow_mut().inits += 1;
        if self.plan.timer {
            ctx.create_timer()?;
        }
        if self.plan.timer_twice {
            ctx.create_timer()?;
            ctx.create_timer()?;
        }
        if self.plan.store {
            ctx.create_persistent_store(&srom_image(ctx.mac()))?;
        }
        if self.plan.fail {
            return Err(InitError::Controller("media autodetect failed".to_string()));
        }
        Ok(())
    }

    fn csr_read(&mut self, bus: &mut BusContext<'_>, offset: u32) -> u32 {
        self.log.borrow_mut().reads.push(offset);
        if offset == CSR9 {
            let index = self.srom_index;
            return bus
                .store()
                .map(|store| u32::from(store.read_word(index)))
                .unwrap_or(0xFFFF);
        }
        *self.reg(offset)
    }

    fn csr_write(&mut self, bus: &mut BusContext<'_>, offset: u32, value: u32) {
        self.log.borrow_mut().writes.push((offset, value));
        match offset {
            CSR1 => {
                let base = u64::from(*self.reg(CSR4));
                let mut frame = vec![0u8; value as usize];
                bus.dma().read_guest_memory(base, &mut frame);
                bus.transmit(&frame);
            }
            CSR5 => {
                // Write-one-to-clear.
                *self.reg(CSR5) &= !value;
                self.update_irq(bus);
            }
            CSR7 => {
                *self.reg(CSR7) = value;
                self.update_irq(bus);
            }
            CSR9 => {
                self.srom_index = ((value >> 16) & 0x7FFF) as usize;
                if value & SROM_WRITE != 0 {
                    if let Some(store) = bus.store() {
                        store.write_word(self.srom_index, value as u16);
                    }
                }
            }
            CSR11 => {
                *self.reg(CSR11) = value;
                if let Some(timer) = bus.timer() {
                    timer.arm(u64::from(value));
                }
            }
            _ => *self.reg(offset) = value,
        }
    }

    fn reset(&mut self, bus: &mut BusContext<'_>) {
        self.regs = [0; 32];
        let o = bus.mac().octets();
        *self.reg(MAC_LO) = u32::from_le_bytes([o[0], o[1], o[2], o[3]]);
        *self.reg(MAC_HI) = u32::from(u16::from_le_bytes([o[4], o[5]]));
        if let Some(timer) = bus.timer() {
            timer.cancel();
        }
        bus.set_irq_level(false);
        let mut log = self.log.borrow_mut();
        log.resets += 1;
        log.reset_macs.push(bus.mac());
    }

    fn can_receive(&self) -> bool {
        self.regs[(CSR6 / 4) as usize] & CSR6_SR != 0 && self.regs[(CSR3 / 4) as usize] != 0
    }

    fn receive(&mut self, bus: &mut BusContext<'_>, frame: &[u8]) -> usize {
        let base = u64::from(*self.reg(CSR3));
        bus.dma().write_guest_memory(base, frame);
        *self.reg(CSR5) |= CSR5_RI;
        self.update_irq(bus);
        self.log.borrow_mut().received.push(frame.to_vec());
        frame.len()
    }

    fn set_link_status(&mut self, _bus: &mut BusContext<'_>, up: bool) {
        self.log.borrow_mut().link.push(up);
    }

    fn timer_expired(&mut self, bus: &mut BusContext<'_>) {
        self.log.borrow_mut().timer_fires += 1;
        *self.reg(CSR5) |= CSR5_GPT;
        self.update_irq(bus);
    }

    fn cleanup(&mut self) {
        self.log.borrow_mut().cleanups += 1;
    }
}

/// Everything a test needs around one realized device.
pub struct Rig {
    pub fabric: FakeFabric,
    pub backend: QueueBackend,
    pub log: Rc<RefCell<BankLog>>,
    pub dev: TulipPciDevice<BankController>,
}

impl Rig {
    pub fn new(plan: InitPlan) -> Self {
        Self::with_config(plan, TulipConfig::default())
    }

    pub fn with_config(plan: InitPlan, config: TulipConfig) -> Self {
        let mut fabric = FakeFabric::new();
        let mut backend = QueueBackend::new("user");
        let (controller, log) = BankController::new(plan);
        let dev = TulipPciDevice::realize(test_bdf(), config, controller, &mut fabric, &mut backend)
            .expect("realize");
        Self {
            fabric,
            backend,
            log,
            dev,
        }
    }

    /// Sets COMMAND.IO | MEM | BME, as a guest driver would.
    pub fn enable_bus_master(&mut self) {
        self.dev.config_write(0x04, 2, 0x0007);
    }
}

/// Backend that hands every transmitted frame straight back to the NIC, synchronously, and
/// records what the NIC said.
#[derive(Default)]
pub struct LoopbackBackend {
    client: Rc<RefCell<Option<Box<dyn NetClient>>>>,
    pub log: Rc<RefCell<Vec<(bool, usize)>>>,
}

struct LoopbackEndpoint {
    client: Rc<RefCell<Option<Box<dyn NetClient>>>>,
    log: Rc<RefCell<Vec<(bool, usize)>>>,
}

impl NetBackend for LoopbackBackend {
    fn register_nic(
        &mut self,
        _info: NicInfo,
        client: Box<dyn NetClient>,
    ) -> Result<Box<dyn NicEndpoint>, NetBackendError> {
        *self.client.borrow_mut() = Some(client);
        Ok(Box::new(LoopbackEndpoint {
            client: self.client.clone(),
            log: self.log.clone(),
        }))
    }
}

impl NicEndpoint for LoopbackEndpoint {
    fn transmit(&mut self, frame: &[u8]) {
        let mut slot = self.client.borrow_mut();
        let Some(client) = slot.as_mut() else {
            return;
        };
        let ready = client.can_receive();
        let taken = client.receive(frame);
        self.log.borrow_mut().push((ready, taken));
    }

    fn link_up(&self) -> bool {
        true
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        let client = self.client.borrow_mut().take();
        if let Some(mut client) = client {
            client.cleanup();
        }
    }
}

/// Backend that refuses every registration.
pub struct RefusingBackend;

impl NetBackend for RefusingBackend {
    fn register_nic(
        &mut self,
        _info: NicInfo,
        _client: Box<dyn NetClient>,
    ) -> Result<Box<dyn NicEndpoint>, NetBackendError> {
        Err(NetBackendError::Unavailable("no such netdev".to_string()))
    }
}
