use core::fmt;

use memory::MmioHandler;

use crate::device::WeakState;
use crate::{TulipController, TULIP_CSR_REGION_SIZE, TULIP_IO_BAR, TULIP_MMIO_BAR};

/// Which BAR a CSR window is mapped through. Both windows dispatch identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsrWindowKind {
    Io,
    Mmio,
}

impl CsrWindowKind {
    pub const fn bar_index(self) -> u8 {
        match self {
            Self::Io => TULIP_IO_BAR,
            Self::Mmio => TULIP_MMIO_BAR,
        }
    }

    pub(crate) const fn resource_name(self) -> &'static str {
        match self {
            Self::Io => "I/O BAR",
            Self::Mmio => "MMIO BAR",
        }
    }
}

impl fmt::Display for CsrWindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Io => "io",
            Self::Mmio => "mmio",
        })
    }
}

/// Register window handed to the fabric for one BAR.
pub(crate) struct CsrWindow<C> {
    kind: CsrWindowKind,
    state: WeakState<C>,
}

impl<C> CsrWindow<C> {
    pub(crate) fn new(kind: CsrWindowKind, state: WeakState<C>) -> Self {
        Self { kind, state }
    }

    /// CSRs are 32 bits wide and dword aligned; nothing else reaches the controller.
    fn accepts(&self, offset: u64, size: usize) -> bool {
        size == 4 && offset % 4 == 0 && offset < u64::from(TULIP_CSR_REGION_SIZE)
    }
}

fn float_high(size: usize) -> u64 {
    match size {
        0 => 0,
        1..=7 => (1u64 << (size * 8)) - 1,
        _ => u64::MAX,
    }
}

impl<C: TulipController> MmioHandler for CsrWindow<C> {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        if !self.accepts(offset, size) {
            tracing::debug!(window = %self.kind, offset, size, "rejected CSR read");
            return float_high(size);
        }
        let Some(shared) = self.state.upgrade() else {
            return float_high(size);
        };
        let Ok(mut state) = shared.try_borrow_mut() else {
            tracing::debug!(window = %self.kind, offset, "reentrant CSR read");
            return float_high(size);
        };
        if !state.is_live() {
            return float_high(size);
        }

        let (controller, mut bus) = state.split();
        u64::from(controller.csr_read(&mut bus, offset as u32))
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        if !self.accepts(offset, size) {
            tracing::debug!(window = %self.kind, offset, size, value, "rejected CSR write");
            return;
        }
        let Some(shared) = self.state.upgrade() else {
            return;
        };
        let Ok(mut state) = shared.try_borrow_mut() else {
            tracing::debug!(window = %self.kind, offset, "reentrant CSR write");
            return;
        };
        if !state.is_live() {
            return;
        }

        let (controller, mut bus) = state.split();
        controller.csr_write(&mut bus, offset as u32, value as u32);
    }
}
