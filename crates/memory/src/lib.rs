//! Guest memory and register-window primitives shared by device models.
//!
//! Device models never own guest RAM. They reach it through a [`MemoryBus`] handed out by the
//! bus fabric, and they expose their own registers to the fabric through [`MmioHandler`]s.
#![forbid(unsafe_code)]

mod bus;
mod dense;
mod mmio;


pub use bus::MemoryBus;
pub use dense::{DenseMemory, GuestMemoryError, GuestMemoryResult};
pub use mmio::MmioHandler;
