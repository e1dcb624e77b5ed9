//! PCI function plumbing shared by device models: identity, Type 0 configuration space, its
//! snapshot encoding, and the services a device consumes from the bus fabric.
#![forbid(unsafe_code)]

pub mod config;
pub mod fabric;
pub mod snapshot;

use core::fmt;

pub use config::{
    PciBarDefinition, PciBarKind, PciBarRange, PciConfigSpace, PciConfigSpaceState,
    PciVendorDeviceId, PCI_CONFIG_SPACE_SIZE,
};
pub use fabric::{
    FabricError, IrqLine, PciFabric, PersistentStore, Timer, TimerCallback, VecStore,
};
pub use snapshot::PciFunctionState;

pub const PCI_COMMAND_IO_SPACE: u16 = 1 << 0;
pub const PCI_COMMAND_MEM_SPACE: u16 = 1 << 1;
pub const PCI_COMMAND_BUS_MASTER: u16 = 1 << 2;
pub const PCI_COMMAND_INTX_DISABLE: u16 = 1 << 10;

pub const PCI_CLASS_NETWORK_ETHERNET: u16 = 0x0200;

/// PCI bus/device/function identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PciBdf {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciBdf {
    /// Creates a new BDF.
    ///
    /// The caller is responsible for ensuring the values are within the PCI ranges:
    /// device < 32, function < 8.
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    /// Packs this BDF using the PCI config-address layout: bus in bits 8..=15, device in bits
    /// 3..=7, function in bits 0..=2.
    pub const fn pack_u16(self) -> u16 {
        debug_assert!(self.device < 32);
        debug_assert!(self.function < 8);
        ((self.bus as u16) << 8) | ((self.device as u16) << 3) | (self.function as u16)
    }

    pub const fn unpack_u16(v: u16) -> Self {
        Self {
            bus: (v >> 8) as u8,
            device: ((v >> 3) & 0x1f) as u8,
            function: (v & 0x7) as u8,
        }
    }
}

impl fmt::Display for PciBdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// PCI INTx interrupt pin.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PciInterruptPin {
    IntA,
    IntB,
    IntC,
    IntD,
}

impl PciInterruptPin {
    /// Converts to the PCI config-space encoding (1 = INTA#, 2 = INTB#, ...).
    pub const fn to_config_u8(self) -> u8 {
        match self {
            Self::IntA => 1,
            Self::IntB => 2,
            Self::IntC => 3,
            Self::IntD => 4,
        }
    }

    pub const fn from_config_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Self::IntA),
            2 => Some(Self::IntB),
            3 => Some(Self::IntC),
            4 => Some(Self::IntD),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bdf_pack_roundtrip_and_display() {
        let bdf = PciBdf::new(0, 3, 1);
        assert_eq!(bdf.pack_u16(), 0x19);
        assert_eq!(PciBdf::unpack_u16(0x19), bdf);
        assert_eq!(bdf.to_string(), "00:03.1");
    }

    #[test]
    fn interrupt_pin_encoding() {
        assert_eq!(PciInterruptPin::IntA.to_config_u8(), 1);
        assert_eq!(PciInterruptPin::from_config_u8(4), Some(PciInterruptPin::IntD));
        assert_eq!(PciInterruptPin::from_config_u8(0), None);
    }
}
