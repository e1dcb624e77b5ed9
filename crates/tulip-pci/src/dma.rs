use std::cell::RefCell;

use memory::MemoryBus;

/// Guest-memory capability handed to the controller's descriptor engine.
pub trait DmaMemory {
    fn read_guest_memory(&mut self, addr: u64, buf: &mut [u8]);
    fn write_guest_memory(&mut self, addr: u64, buf: &[u8]);
}

impl<T: MemoryBus + ?Sized> DmaMemory for T {
    fn read_guest_memory(&mut self, addr: u64, buf: &mut [u8]) {
        self.read_physical(addr, buf);
    }

    fn write_guest_memory(&mut self, addr: u64, buf: &[u8]) {
        self.write_physical(addr, buf);
    }
}

/// Bus-master view of guest memory for one PCI function.
///
/// The address space is borrowed from the fabric for the duration of a single access. While
/// PCI COMMAND.BME is clear the function cannot master the bus: reads see an open bus (all
/// ones) and writes are discarded.
pub struct PciDma<'a> {
    space: Option<&'a RefCell<dyn MemoryBus + 'static>>,
    bus_master: bool,
}

impl<'a> PciDma<'a> {
    pub(crate) fn new(
        space: Option<&'a RefCell<dyn MemoryBus + 'static>>,
        bus_master: bool,
    ) -> Self {
        Self { space, bus_master }
    }

    pub fn bus_master_enabled(&self) -> bool {
        self.bus_master
    }

    fn space(
        &self,
        op: &'static str,
        addr: u64,
        len: usize,
    ) -> Option<&'a RefCell<dyn MemoryBus + 'static>> {
        if !self.bus_master {
            tracing::trace!(op, addr, len, "DMA blocked: bus mastering disabled");
            return None;
        }
        if self.space.is_none() {
            tracing::trace!(op, addr, len, "DMA blocked: no address space");
        }
        self.space
    }
}

impl MemoryBus for PciDma<'_> {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        let Some(space) = self.space("read", paddr, buf.len()) else {
            buf.fill(0xFF);
            return;
        };
        match space.try_borrow_mut() {
            Ok(mut mem) => mem.read_physical(paddr, buf),
            Err(_) => {
                tracing::debug!(
                    addr = paddr,
                    len = buf.len(),
                    "DMA read while guest memory is busy"
                );
                buf.fill(0xFF);
            }
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        let Some(space) = self.space("write", paddr, buf.len()) else {
            return;
        };
        match space.try_borrow_mut() {
            Ok(mut mem) => mem.write_physical(paddr, buf),
            Err(_) => {
                tracing::debug!(
                    addr = paddr,
                    len = buf.len(),
                    "DMA write while guest memory is busy"
                );
            }
        }
    }
}
