//! Services a PCI function obtains from the platform while it is being realized.
//!
//! Interrupt lines, timers and persistent stores are handed out as owned handles; dropping a
//! handle releases the resource. BAR handlers are owned by the fabric for as long as the
//! function is plugged in.

use std::cell::RefCell;
use std::rc::Rc;

use memory::{MemoryBus, MmioHandler};

use crate::{PciBarDefinition, PciBdf, PciInterruptPin};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("BAR{index} of {bdf} is already registered")]
    BarInUse { bdf: PciBdf, index: u8 },

    #[error("no interrupt line available for {bdf}")]
    NoIrqAvailable { bdf: PciBdf },

    #[error("platform exhausted: {0}")]
    Exhausted(&'static str),

    #[error("no PCI function at {bdf}")]
    NoSuchFunction { bdf: PciBdf },
}

/// A level-triggered interrupt line routed to the platform interrupt controller.
pub trait IrqLine {
    fn set_level(&mut self, level: bool);
}

/// One-shot timer on the virtual clock.
pub trait Timer {
    /// Arms (or re-arms) the timer to fire `delay_ns` from now.
    fn arm(&mut self, delay_ns: u64);
    fn cancel(&mut self);
    fn is_armed(&self) -> bool;
}

/// Callback invoked by the platform when a [`Timer`] fires.
pub type TimerCallback = Box<dyn FnMut()>;

/// Small word-addressed non-volatile store (serial EEPROM / SROM).
pub trait PersistentStore {
    fn word_count(&self) -> usize;
    /// Out-of-range reads return `0xFFFF` (erased cell).
    fn read_word(&self, index: usize) -> u16;
    /// Out-of-range writes are ignored.
    fn write_word(&mut self, index: usize, value: u16);
}

/// Host bus fabric a PCI function is realized on.
pub trait PciFabric {
    /// Maps `handler` behind BAR `index`. The mapping lives as long as the fabric decodes the
    /// BAR; the fabric drops the handler when the function is unplugged.
    fn register_bar(
        &mut self,
        bdf: PciBdf,
        index: u8,
        def: PciBarDefinition,
        handler: Box<dyn MmioHandler>,
    ) -> Result<(), FabricError>;

    fn allocate_irq(
        &mut self,
        bdf: PciBdf,
        pin: PciInterruptPin,
    ) -> Result<Box<dyn IrqLine>, FabricError>;

    /// Guest-physical address space as seen by bus-master DMA from `bdf`.
    fn dma_address_space(&mut self, bdf: PciBdf)
        -> Result<Rc<RefCell<dyn MemoryBus>>, FabricError>;

    fn new_timer(&mut self, callback: TimerCallback) -> Result<Box<dyn Timer>, FabricError>;

    /// Allocates a store seeded with `initial` words.
    fn allocate_persistent_store(
        &mut self,
        bdf: PciBdf,
        initial: &[u16],
    ) -> Result<Box<dyn PersistentStore>, FabricError>;
}

impl<T: IrqLine + ?Sized> IrqLine for Box<T> {
    fn set_level(&mut self, level: bool) {
        (**self).set_level(level)
    }
}

impl<T: Timer + ?Sized> Timer for Box<T> {
    fn arm(&mut self, delay_ns: u64) {
        (**self).arm(delay_ns)
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }

    fn is_armed(&self) -> bool {
        (**self).is_armed()
    }
}

/// Plain in-memory [`PersistentStore`], usable as the fabric-side backing of a store handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VecStore {
    words: Vec<u16>,
}

impl VecStore {
    pub fn new(initial: &[u16]) -> Self {
        Self {
            words: initial.to_vec(),
        }
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }
}

impl PersistentStore for VecStore {
    fn word_count(&self) -> usize {
        self.words.len()
    }

    fn read_word(&self, index: usize) -> u16 {
        self.words.get(index).copied().unwrap_or(0xFFFF)
    }

    fn write_word(&mut self, index: usize, value: u16) {
        if let Some(slot) = self.words.get_mut(index) {
            *slot = value;
        }
    }
}
