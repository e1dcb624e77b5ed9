use std::cell::RefCell;
use std::rc::Rc;

use memory::MemoryBus;
use net_backend::{MacAddr, NicEndpoint};
use pci::{IrqLine, PciBdf, PciConfigSpace, PciFabric, PersistentStore, Timer, TimerCallback};

use crate::{InitError, PciDma};

/// Controller register logic and descriptor engine, driven by the bus adapter.
///
/// Every entry point except [`TulipController::can_receive`] gets a [`BusContext`] for the
/// duration of the call. Calls never nest: the adapter refuses to re-enter the controller while
/// one of these methods is running.
pub trait TulipController {
    /// One-time setup, run last during realize. A returned error fails the realize and tears
    /// the device down.
    fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), InitError>;

    /// 32-bit CSR read at `offset` within the window.
    fn csr_read(&mut self, bus: &mut BusContext<'_>, offset: u32) -> u32;
    fn csr_write(&mut self, bus: &mut BusContext<'_>, offset: u32, value: u32);

    fn reset(&mut self, bus: &mut BusContext<'_>);

    fn can_receive(&self) -> bool;

    /// Accepts a host → guest frame. Returns the number of bytes consumed; 0 drops the frame.
    fn receive(&mut self, bus: &mut BusContext<'_>, frame: &[u8]) -> usize;

    fn set_link_status(&mut self, bus: &mut BusContext<'_>, up: bool);

    fn timer_expired(&mut self, _bus: &mut BusContext<'_>) {}

    /// Releases controller-internal resources. Called once, when the network endpoint goes away.
    fn cleanup(&mut self);
}

/// Handles the adapter owns on behalf of one device.
#[derive(Default)]
pub(crate) struct Resources {
    pub(crate) irq: Option<Box<dyn IrqLine>>,
    pub(crate) timer: Option<Box<dyn Timer>>,
    pub(crate) store: Option<Box<dyn PersistentStore>>,
    pub(crate) nic: Option<Box<dyn NicEndpoint>>,
    pub(crate) dma: Option<Rc<RefCell<dyn MemoryBus>>>,
    /// Interrupt level requested by the controller.
    pub(crate) irq_level: bool,
    /// Level currently driven on the physical line.
    pub(crate) irq_asserted: bool,
}

impl Resources {
    /// Drives the INTx line from the controller's level, honouring COMMAND.INTX_DISABLE.
    pub(crate) fn sync_irq(&mut self, config: &PciConfigSpace) {
        let level = self.irq_level && !config.intx_disabled();
        if level == self.irq_asserted {
            return;
        }
        if let Some(irq) = self.irq.as_mut() {
            irq.set_level(level);
            self.irq_asserted = level;
        }
    }
}

/// Allocation window offered to [`TulipController::init`].
pub struct InitContext<'a> {
    pub(crate) bdf: PciBdf,
    pub(crate) mac: MacAddr,
    pub(crate) fabric: &'a mut dyn PciFabric,
    pub(crate) res: &'a mut Resources,
    pub(crate) timer_callback: &'a mut Option<TimerCallback>,
}

impl InitContext<'_> {
    pub fn bdf(&self) -> PciBdf {
        self.bdf
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Creates the device's timer. Expiry is delivered through
    /// [`TulipController::timer_expired`].
    pub fn create_timer(&mut self) -> Result<(), InitError> {
        if self.res.timer.is_some() {
            return Err(InitError::AlreadyAllocated("timer"));
        }
        let callback = self
            .timer_callback
            .take()
            .ok_or(InitError::AlreadyAllocated("timer"))?;
        let timer = self
            .fabric
            .new_timer(callback)
            .map_err(|source| InitError::Resource {
                resource: "timer",
                source,
            })?;
        self.res.timer = Some(timer);
        Ok(())
    }

    /// Allocates the persistent store (serial ROM) seeded with `initial` words.
    pub fn create_persistent_store(&mut self, initial: &[u16]) -> Result<(), InitError> {
        if self.res.store.is_some() {
            return Err(InitError::AlreadyAllocated("persistent store"));
        }
        let store = self
            .fabric
            .allocate_persistent_store(self.bdf, initial)
            .map_err(|source| InitError::Resource {
                resource: "persistent store",
                source,
            })?;
        self.res.store = Some(store);
        Ok(())
    }
}

/// Bus-side services available to the controller while it handles one event.
pub struct BusContext<'a> {
    pub(crate) bdf: PciBdf,
    pub(crate) mac: MacAddr,
    pub(crate) config: &'a PciConfigSpace,
    pub(crate) res: &'a mut Resources,
}

impl BusContext<'_> {
    pub fn bdf(&self) -> PciBdf {
        self.bdf
    }

    /// Station address currently configured for the device.
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn dma(&self) -> PciDma<'_> {
        PciDma::new(self.res.dma.as_deref(), self.config.bus_master_enabled())
    }

    /// Sets the controller's interrupt request level. The physical INTx line follows it unless
    /// the guest has set COMMAND.INTX_DISABLE.
    pub fn set_irq_level(&mut self, level: bool) {
        self.res.irq_level = level;
        self.res.sync_irq(self.config);
    }

    pub fn irq_level(&self) -> bool {
        self.res.irq_level
    }

    /// Hands a guest → host frame to the network backend.
    pub fn transmit(&mut self, frame: &[u8]) {
        match self.res.nic.as_mut() {
            Some(nic) => nic.transmit(frame),
            None => {
                tracing::trace!(bdf = %self.bdf, len = frame.len(), "no backend; frame dropped")
            }
        }
    }

    pub fn link_up(&self) -> bool {
        self.res.nic.as_ref().is_some_and(|nic| nic.link_up())
    }

    pub fn timer(&mut self) -> Option<&mut (dyn Timer + 'static)> {
        self.res.timer.as_deref_mut()
    }

    pub fn store(&mut self) -> Option<&mut (dyn PersistentStore + 'static)> {
        self.res.store.as_deref_mut()
    }
}
