//! Network endpoint contract between emulated NIC models and host-side network backends.
//!
//! A NIC registers a [`NetClient`] with a [`NetBackend`] and receives a [`NicEndpoint`] handle
//! in return. The backend pushes host → guest frames and link changes through the client
//! callbacks; the NIC transmits through the endpoint. Dropping the endpoint detaches the client
//! and invokes its [`NetClient::cleanup`] exactly once.
#![forbid(unsafe_code)]

mod mac;
pub mod queue;

use std::cell::RefCell;
use std::rc::Rc;

pub use mac::{MacAddr, MacAddrParseError};
pub use queue::{QueueBackend, QueueBackendStats};

/// Callbacks a backend invokes on the NIC side.
pub trait NetClient {
    /// Whether the NIC can accept a frame right now.
    fn can_receive(&self) -> bool;

    /// Delivers a host → guest frame. Returns the number of bytes consumed; 0 means the frame
    /// was not accepted.
    fn receive(&mut self, frame: &[u8]) -> usize;

    fn link_status_changed(&mut self, up: bool);

    /// Called once when the endpoint is released.
    fn cleanup(&mut self);
}

/// NIC-side handle on a backend registration.
pub trait NicEndpoint {
    /// Transmit a guest → host Ethernet frame.
    fn transmit(&mut self, frame: &[u8]);

    fn link_up(&self) -> bool;

    /// The NIC's station address changed (e.g. after a snapshot restore).
    fn set_mac(&mut self, _mac: MacAddr) {}
}

/// Identity a NIC presents when registering with a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicInfo {
    /// Device model name, e.g. `tulip`.
    pub model: &'static str,
    /// Instance id, unique per machine (typically the PCI address).
    pub id: String,
    pub mac: MacAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetBackendError {
    #[error("backend {backend:?} already has a NIC attached")]
    AlreadyAttached { backend: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Host-side network backend a NIC can attach to.
pub trait NetBackend {
    fn register_nic(
        &mut self,
        info: NicInfo,
        client: Box<dyn NetClient>,
    ) -> Result<Box<dyn NicEndpoint>, NetBackendError>;
}

impl<T: NetBackend + ?Sized> NetBackend for Box<T> {
    fn register_nic(
        &mut self,
        info: NicInfo,
        client: Box<dyn NetClient>,
    ) -> Result<Box<dyn NicEndpoint>, NetBackendError> {
        <T as NetBackend>::register_nic(&mut **self, info, client)
    }
}

impl<T: NetBackend + ?Sized> NetBackend for &mut T {
    fn register_nic(
        &mut self,
        info: NicInfo,
        client: Box<dyn NetClient>,
    ) -> Result<Box<dyn NicEndpoint>, NetBackendError> {
        <T as NetBackend>::register_nic(&mut **self, info, client)
    }
}

impl<T: NetBackend + ?Sized> NetBackend for Rc<RefCell<T>> {
    fn register_nic(
        &mut self,
        info: NicInfo,
        client: Box<dyn NetClient>,
    ) -> Result<Box<dyn NicEndpoint>, NetBackendError> {
        self.borrow_mut().register_nic(info, client)
    }
}

impl<T: NicEndpoint + ?Sized> NicEndpoint for Box<T> {
    fn transmit(&mut self, frame: &[u8]) {
        <T as NicEndpoint>::transmit(&mut **self, frame)
    }

    fn link_up(&self) -> bool {
        <T as NicEndpoint>::link_up(&**self)
    }

    fn set_mac(&mut self, mac: MacAddr) {
        <T as NicEndpoint>::set_mac(&mut **self, mac)
    }
}
