use std::cell::RefCell;
use std::rc::{Rc, Weak};

use net_backend::{MacAddr, NetBackend, NicInfo};
use pci::{PciBarDefinition, PciBdf, PciConfigSpace, PciFabric, PciInterruptPin, TimerCallback};

use crate::controller::{BusContext, InitContext, Resources};
use crate::csr::{CsrWindow, CsrWindowKind};
use crate::net::TulipNetClient;
use crate::{
    Error, InitError, TulipConfig, TulipController, TULIP_CACHE_LINE_SIZE,
    TULIP_CSR_REGION_SIZE, TULIP_DEVICE_ID, TULIP_REVISION_ID, TULIP_VENDOR_ID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    /// Resources are being allocated; callbacks are ignored.
    Realizing,
    Live,
    TornDown,
}

pub(crate) struct TulipState<C> {
    pub(crate) bdf: PciBdf,
    pub(crate) mac: MacAddr,
    pub(crate) config: PciConfigSpace,
    pub(crate) res: Resources,
    pub(crate) controller: C,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) controller_cleaned: bool,
}

impl<C: TulipController> TulipState<C> {
    pub(crate) fn is_live(&self) -> bool {
        self.lifecycle == Lifecycle::Live
    }

    /// Splits the state into the controller and the bus view it operates on.
    pub(crate) fn split(&mut self) -> (&mut C, BusContext<'_>) {
        let bus = BusContext {
            bdf: self.bdf,
            mac: self.mac,
            config: &self.config,
            res: &mut self.res,
        };
        (&mut self.controller, bus)
    }

    pub(crate) fn cleanup_controller(&mut self) {
        if !self.controller_cleaned {
            self.controller_cleaned = true;
            self.controller.cleanup();
        }
    }
}

pub(crate) type SharedState<C> = Rc<RefCell<TulipState<C>>>;
pub(crate) type WeakState<C> = Weak<RefCell<TulipState<C>>>;

/// A DEC 21143 PCI function.
///
/// Created by [`TulipPciDevice::realize`]; destroyed by [`TulipPciDevice::teardown`] or by
/// dropping it.
pub struct TulipPciDevice<C: TulipController + 'static> {
    state: SharedState<C>,
    netdev: Option<String>,
}

impl<C: TulipController + 'static> TulipPciDevice<C> {
    /// Plugs a new function in at `bdf`.
    ///
    /// Allocation order: BAR0 (I/O), BAR1 (MMIO), INTA#, DMA address space, network endpoint,
    /// then `controller.init`. On failure everything already allocated is released before the
    /// error is returned.
    pub fn realize(
        bdf: PciBdf,
        config: TulipConfig,
        controller: C,
        fabric: &mut dyn PciFabric,
        backend: &mut dyn NetBackend,
    ) -> Result<Self, Error> {
        config.validate()?;
        let mac = config.station_address(bdf);

        let mut pci = PciConfigSpace::new(TULIP_VENDOR_ID, TULIP_DEVICE_ID);
        pci.set_class_code(0x02, 0x00, 0x00, TULIP_REVISION_ID);
        pci.set_cache_line_size(TULIP_CACHE_LINE_SIZE);
        pci.set_interrupt_pin(PciInterruptPin::IntA.to_config_u8());
        for kind in [CsrWindowKind::Io, CsrWindowKind::Mmio] {
            pci.set_bar_definition(kind.bar_index(), bar_definition(kind));
        }

        let mut dev = Self {
            state: Rc::new(RefCell::new(TulipState {
                bdf,
                mac,
                config: pci,
                res: Resources::default(),
                controller,
                lifecycle: Lifecycle::Realizing,
                controller_cleaned: false,
            })),
            netdev: config.netdev,
        };

        match dev.attach(fabric, backend) {
            Ok(()) => {
                dev.state.borrow_mut().lifecycle = Lifecycle::Live;
                tracing::debug!(%bdf, %mac, netdev = ?dev.netdev, "tulip realized");
                Ok(dev)
            }
            Err(err) => {
                tracing::warn!(%bdf, error = %err, "tulip realize failed");
                dev.teardown();
                Err(err.into())
            }
        }
    }

    fn attach(
        &mut self,
        fabric: &mut dyn PciFabric,
        backend: &mut dyn NetBackend,
    ) -> Result<(), InitError> {
        let (bdf, mac) = {
            let state = self.state.borrow();
            (state.bdf, state.mac)
        };
        let weak = Rc::downgrade(&self.state);

        for kind in [CsrWindowKind::Io, CsrWindowKind::Mmio] {
            fabric
                .register_bar(
                    bdf,
                    kind.bar_index(),
                    bar_definition(kind),
                    Box::new(CsrWindow::new(kind, weak.clone())),
                )
                .map_err(|source| InitError::Resource {
                    resource: kind.resource_name(),
                    source,
                })?;
        }

        let irq = fabric
            .allocate_irq(bdf, PciInterruptPin::IntA)
            .map_err(|source| InitError::Resource {
                resource: "interrupt line",
                source,
            })?;
        self.state.borrow_mut().res.irq = Some(irq);

        let dma = fabric
            .dma_address_space(bdf)
            .map_err(|source| InitError::Resource {
                resource: "DMA address space",
                source,
            })?;
        self.state.borrow_mut().res.dma = Some(dma);

        let info = NicInfo {
            model: crate::DEVICE_INFO.name,
            id: bdf.to_string(),
            mac,
        };
        let nic = backend.register_nic(info, Box::new(TulipNetClient::new(weak.clone())))?;
        self.state.borrow_mut().res.nic = Some(nic);

        let mut timer_callback = Some(timer_callback(weak));
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let mut ctx = InitContext {
            bdf,
            mac,
            fabric,
            res: &mut state.res,
            timer_callback: &mut timer_callback,
        };
        state.controller.init(&mut ctx)
    }

    /// Device-level reset. Only the controller is reset; PCI configuration is left to the bus.
    pub fn reset(&mut self) {
        let mut state = self.state.borrow_mut();
        if !state.is_live() {
            return;
        }
        tracing::debug!(bdf = %state.bdf, "tulip reset");
        let (controller, mut bus) = state.split();
        controller.reset(&mut bus);
    }

    /// Releases the interrupt line, timer, persistent store and network endpoint.
    ///
    /// Safe to call repeatedly and on a partially realized device. Dropping the endpoint makes
    /// the backend invoke the client's cleanup, which releases the controller's own resources.
    pub fn teardown(&mut self) {
        let (irq, timer, store, nic, dma) = {
            let mut state = self.state.borrow_mut();
            if state.lifecycle == Lifecycle::TornDown {
                return;
            }
            state.lifecycle = Lifecycle::TornDown;
            tracing::debug!(bdf = %state.bdf, "tulip teardown");
            let res = &mut state.res;
            res.irq_level = false;
            (
                res.irq.take(),
                res.timer.take(),
                res.store.take(),
                res.nic.take(),
                res.dma.take(),
            )
        };

        if let Some(mut irq) = irq {
            if self.state.borrow().res.irq_asserted {
                irq.set_level(false);
            }
            drop(irq);
        }
        self.state.borrow_mut().res.irq_asserted = false;
        drop(timer);
        drop(store);
        drop(nic);
        drop(dma);
    }

    pub fn bdf(&self) -> PciBdf {
        self.state.borrow().bdf
    }

    pub fn mac(&self) -> MacAddr {
        self.state.borrow().mac
    }

    pub fn netdev(&self) -> Option<&str> {
        self.netdev.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.state.borrow().is_live()
    }

    pub fn config_read(&self, offset: u16, size: usize) -> u32 {
        self.state.borrow().config.read(offset, size)
    }

    /// Guest config-space write. A COMMAND write re-evaluates the INTx line.
    pub fn config_write(&mut self, offset: u16, size: usize, value: u32) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.config.write(offset, size, value);
        state.res.sync_irq(&state.config);
    }

    /// Runs `f` against the controller, e.g. for host-side inspection.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.state.borrow_mut().controller)
    }

    pub(crate) fn state(&self) -> &SharedState<C> {
        &self.state
    }
}

impl<C: TulipController + 'static> Drop for TulipPciDevice<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn bar_definition(kind: CsrWindowKind) -> PciBarDefinition {
    match kind {
        CsrWindowKind::Io => PciBarDefinition::Io {
            size: TULIP_CSR_REGION_SIZE,
        },
        CsrWindowKind::Mmio => PciBarDefinition::Mmio32 {
            size: TULIP_CSR_REGION_SIZE,
            prefetchable: false,
        },
    }
}

fn timer_callback<C: TulipController + 'static>(state: WeakState<C>) -> TimerCallback {
    Box::new(move || {
        let Some(shared) = state.upgrade() else {
            return;
        };
        let Ok(mut state) = shared.try_borrow_mut() else {
            tracing::debug!("tulip timer fired while the device is busy; skipped");
            return;
        };
        if !state.is_live() {
            return;
        }
        let (controller, mut bus) = state.split();
        controller.timer_expired(&mut bus);
    })
}
