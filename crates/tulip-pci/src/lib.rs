//! PCI bus adapter for an emulated DEC 21143 ("Tulip") Ethernet controller.
//!
//! This crate is the glue between three independent subsystems:
//! - the PCI fabric, which maps the controller's CSR window twice (BAR0 as I/O space, BAR1 as
//!   32-bit memory space) and routes one INTx line,
//! - guest memory, reached by the controller's descriptor engine through [`PciDma`],
//! - a network backend, which delivers frames and link changes through a registered client.
//!
//! The controller's register semantics live behind the [`TulipController`] trait. Everything a
//! controller touches on the bus side goes through a [`BusContext`], so the controller never
//! holds fabric or backend handles itself.
//!
//! All callbacks the fabric or backend hold (window handlers, the timer callback, the network
//! client) refer to the device weakly. Once the device is torn down or dropped they become
//! inert: reads float high, writes and frames are ignored.
#![forbid(unsafe_code)]

mod config;
mod controller;
mod csr;
mod device;
mod dma;
mod error;
mod net;
mod snapshot;

pub use config::TulipConfig;
pub use controller::{BusContext, InitContext, TulipController};
pub use csr::CsrWindowKind;
pub use device::TulipPciDevice;
pub use dma::{DmaMemory, PciDma};
pub use error::{ConfigError, Error, InitError};

pub const TULIP_VENDOR_ID: u16 = 0x1011;
pub const TULIP_DEVICE_ID: u16 = 0x0019;
/// 21143 (0x2x would be a 21142).
pub const TULIP_REVISION_ID: u8 = 0x41;
pub const TULIP_CACHE_LINE_SIZE: u8 = 0x10;

/// Size of the CSR window exposed through each BAR.
pub const TULIP_CSR_REGION_SIZE: u32 = 0x80;

pub const TULIP_IO_BAR: u8 = 0;
pub const TULIP_MMIO_BAR: u8 = 1;

/// Static description of a device model, for machine builders that enumerate models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub vendor_id: u16,
    pub device_id: u16,
    pub revision_id: u8,
    pub class: u16,
}

pub const DEVICE_INFO: DeviceInfo = DeviceInfo {
    name: "tulip",
    description: "DEC 21143 Tulip",
    category: "network",
    vendor_id: TULIP_VENDOR_ID,
    device_id: TULIP_DEVICE_ID,
    revision_id: TULIP_REVISION_ID,
    class: pci::PCI_CLASS_NETWORK_ETHERNET,
};
