//! In-process backend that buffers host → guest frames until the NIC can take them and
//! collects guest → host frames for the host to drain.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::{MacAddr, NetBackend, NetBackendError, NetClient, NicEndpoint, NicInfo};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueBackendStats {
    /// Frames handed to the NIC.
    pub rx_delivered: u64,
    /// Frames parked because the NIC could not take them yet.
    pub rx_queued: u64,
    /// Frames dropped because the queue was full or no NIC was attached.
    pub rx_dropped: u64,
    /// Frames the NIC transmitted that are waiting for, or were taken by, the host.
    pub tx_frames: u64,
    /// Transmitted frames dropped because the host had not drained the queue.
    pub tx_dropped: u64,
}

enum ClientSlot {
    Empty,
    Attached(Box<dyn NetClient>),
    /// The client is out of the slot running a callback.
    InUse,
    /// The endpoint was dropped while the client was in use.
    DetachPending,
}

struct Hub {
    name: String,
    capacity: usize,
    nic: Option<NicInfo>,
    client: ClientSlot,
    link_up: bool,
    pending: VecDeque<Vec<u8>>,
    transmitted: VecDeque<Vec<u8>>,
    stats: QueueBackendStats,
}

/// Single-NIC queueing backend. Cloning yields another handle on the same backend.
///
/// Client callbacks run with the backend unborrowed, so a NIC may transmit (or even drop its
/// endpoint) from inside `receive`.
#[derive(Clone)]
pub struct QueueBackend {
    hub: Rc<RefCell<Hub>>,
}

impl QueueBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            hub: Rc::new(RefCell::new(Hub {
                name: name.into(),
                capacity,
                nic: None,
                client: ClientSlot::Empty,
                link_up: true,
                pending: VecDeque::new(),
                transmitted: VecDeque::new(),
                stats: QueueBackendStats::default(),
            })),
        }
    }

    pub fn name(&self) -> String {
        self.hub.borrow().name.clone()
    }

    pub fn stats(&self) -> QueueBackendStats {
        self.hub.borrow().stats
    }

    pub fn nic(&self) -> Option<NicInfo> {
        self.hub.borrow().nic.clone()
    }

    pub fn is_attached(&self) -> bool {
        !matches!(self.hub.borrow().client, ClientSlot::Empty)
    }

    pub fn pending_len(&self) -> usize {
        self.hub.borrow().pending.len()
    }

    pub fn link_up(&self) -> bool {
        self.hub.borrow().link_up
    }

    /// Offers a host → guest frame. Returns `true` if it was delivered immediately.
    pub fn inject(&self, frame: Vec<u8>) -> bool {
        if self.hub.borrow().pending.is_empty() {
            match self.deliver(&frame) {
                Delivery::Delivered => return true,
                Delivery::Busy => {}
                Delivery::NoClient => {
                    self.drop_frame(frame.len(), "no NIC attached");
                    return false;
                }
            }
        }

        let mut hub = self.hub.borrow_mut();
        if hub.pending.len() >= hub.capacity {
            drop(hub);
            self.drop_frame(frame.len(), "receive queue full");
            return false;
        }
        hub.pending.push_back(frame);
        hub.stats.rx_queued += 1;
        false
    }

    /// Retries parked frames in order until the NIC refuses one. Returns the number delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            let Some(frame) = self.hub.borrow_mut().pending.pop_front() else {
                break;
            };
            match self.deliver(&frame) {
                Delivery::Delivered => delivered += 1,
                Delivery::Busy | Delivery::NoClient => {
                    self.hub.borrow_mut().pending.push_front(frame);
                    break;
                }
            }
        }
        delivered
    }

    pub fn set_link_up(&self, up: bool) {
        self.hub.borrow_mut().link_up = up;
        self.with_client(|client| client.link_status_changed(up));
    }

    pub fn pop_transmitted(&self) -> Option<Vec<u8>> {
        self.hub.borrow_mut().transmitted.pop_front()
    }

    fn deliver(&self, frame: &[u8]) -> Delivery {
        let accepted = self.with_client(|client| {
            if client.can_receive() {
                client.receive(frame) != 0
            } else {
                false
            }
        });
        match accepted {
            Some(true) => {
                self.hub.borrow_mut().stats.rx_delivered += 1;
                Delivery::Delivered
            }
            Some(false) => Delivery::Busy,
            None if self.is_attached() => Delivery::Busy,
            None => Delivery::NoClient,
        }
    }

    fn drop_frame(&self, len: usize, reason: &'static str) {
        let mut hub = self.hub.borrow_mut();
        hub.stats.rx_dropped += 1;
        tracing::warn!(backend = %hub.name, len, reason, "dropping host frame");
    }

    /// Runs `f` on the attached client with the hub unborrowed. Returns `None` when no client
    /// is attached or the client is already running a callback.
    fn with_client<R>(&self, f: impl FnOnce(&mut dyn NetClient) -> R) -> Option<R> {
        let mut client = {
            let mut hub = self.hub.borrow_mut();
            match std::mem::replace(&mut hub.client, ClientSlot::InUse) {
                ClientSlot::Attached(client) => client,
                other => {
                    hub.client = other;
                    return None;
                }
            }
        };

        let result = f(client.as_mut());

        let detached = {
            let mut hub = self.hub.borrow_mut();
            if matches!(hub.client, ClientSlot::DetachPending) {
                hub.client = ClientSlot::Empty;
                hub.nic = None;
                true
            } else {
                false
            }
        };
        if detached {
            client.cleanup();
        } else {
            self.hub.borrow_mut().client = ClientSlot::Attached(client);
        }
        Some(result)
    }
}

enum Delivery {
    Delivered,
    Busy,
    NoClient,
}

impl NetBackend for QueueBackend {
    fn register_nic(
        &mut self,
        info: NicInfo,
        client: Box<dyn NetClient>,
    ) -> Result<Box<dyn NicEndpoint>, NetBackendError> {
        let mut hub = self.hub.borrow_mut();
        if !matches!(hub.client, ClientSlot::Empty) {
            return Err(NetBackendError::AlreadyAttached {
                backend: hub.name.clone(),
            });
        }
        tracing::debug!(backend = %hub.name, nic = %info.id, mac = %info.mac, "NIC attached");
        hub.client = ClientSlot::Attached(client);
        hub.nic = Some(info);
        Ok(Box::new(QueueEndpoint {
            hub: Rc::downgrade(&self.hub),
        }))
    }
}

struct QueueEndpoint {
    hub: Weak<RefCell<Hub>>,
}

impl NicEndpoint for QueueEndpoint {
    fn transmit(&mut self, frame: &[u8]) {
        if let Some(hub) = self.hub.upgrade() {
            let mut hub = hub.borrow_mut();
            if hub.transmitted.len() >= hub.capacity {
                hub.stats.tx_dropped += 1;
                tracing::warn!(
                    backend = %hub.name,
                    len = frame.len(),
                    "transmit queue full; dropping guest frame"
                );
                return;
            }
            hub.stats.tx_frames += 1;
            hub.transmitted.push_back(frame.to_vec());
        }
    }

    fn link_up(&self) -> bool {
        self.hub.upgrade().is_some_and(|hub| hub.borrow().link_up)
    }

    fn set_mac(&mut self, mac: MacAddr) {
        if let Some(hub) = self.hub.upgrade() {
            if let Some(nic) = hub.borrow_mut().nic.as_mut() {
                nic.mac = mac;
            }
        }
    }
}

impl Drop for QueueEndpoint {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let client = {
            let mut hub = hub.borrow_mut();
            match std::mem::replace(&mut hub.client, ClientSlot::Empty) {
                ClientSlot::Attached(client) => {
                    hub.nic = None;
                    tracing::debug!(backend = %hub.name, "NIC detached");
                    Some(client)
                }
                ClientSlot::InUse => {
                    hub.client = ClientSlot::DetachPending;
                    None
                }
                other => {
                    hub.client = other;
                    None
                }
            }
        };
        if let Some(mut client) = client {
            client.cleanup();
        }
    }
}
