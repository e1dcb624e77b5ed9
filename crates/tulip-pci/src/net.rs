use net_backend::NetClient;

use crate::device::WeakState;
use crate::TulipController;

/// Client registered with the network backend on the device's behalf.
pub(crate) struct TulipNetClient<C> {
    state: WeakState<C>,
}

impl<C> TulipNetClient<C> {
    pub(crate) fn new(state: WeakState<C>) -> Self {
        Self { state }
    }
}

impl<C: TulipController> NetClient for TulipNetClient<C> {
    fn can_receive(&self) -> bool {
        let Some(shared) = self.state.upgrade() else {
            return false;
        };
        let Ok(state) = shared.try_borrow() else {
            return false;
        };
        state.is_live() && state.controller.can_receive()
    }

    fn receive(&mut self, frame: &[u8]) -> usize {
        let Some(shared) = self.state.upgrade() else {
            return 0;
        };
        let Ok(mut state) = shared.try_borrow_mut() else {
            tracing::debug!(len = frame.len(), "frame delivered while device is busy; dropped");
            return 0;
        };
        if !state.is_live() {
            return 0;
        }
        let (controller, mut bus) = state.split();
        controller.receive(&mut bus, frame)
    }

    fn link_status_changed(&mut self, up: bool) {
        let Some(shared) = self.state.upgrade() else {
            return;
        };
        let Ok(mut state) = shared.try_borrow_mut() else {
            tracing::debug!(up, "link change while device is busy; dropped");
            return;
        };
        if !state.is_live() {
            return;
        }
        tracing::debug!(bdf = %state.bdf, up, "tulip link status");
        let (controller, mut bus) = state.split();
        controller.set_link_status(&mut bus, up);
    }

    fn cleanup(&mut self) {
        let Some(shared) = self.state.upgrade() else {
            return;
        };
        match shared.try_borrow_mut() {
            Ok(mut state) => state.cleanup_controller(),
            Err(_) => tracing::warn!("network endpoint released while device is busy"),
        };
    }
}
