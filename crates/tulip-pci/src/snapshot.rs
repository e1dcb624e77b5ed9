use io_snapshot::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};
use net_backend::MacAddr;
use pci::PciFunctionState;

use crate::config::check_station_address;
use crate::{TulipController, TulipPciDevice};

// v1: PCI function state only.
// v2: adds the station address.
const TAG_PCI_FUNCTION: u16 = 1;
const TAG_MAC: u16 = 2;

/// Oldest device major version `load_state` accepts.
const MIN_DEVICE_MAJOR: u16 = 1;

impl<C: TulipController + 'static> IoSnapshot for TulipPciDevice<C> {
    const DEVICE_ID: [u8; 4] = *b"TULP";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(2, 0);

    fn save_state(&self) -> Vec<u8> {
        let state = self.state().borrow();
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_bytes(
            TAG_PCI_FUNCTION,
            PciFunctionState::capture(state.bdf, &state.config).save_state(),
        );
        w.field_bytes(TAG_MAC, state.mac.octets().to_vec());
        w.finish()
    }

    /// Restores bus-visible state and resets the controller against it. Controller internals
    /// (rings, counters, SROM contents) are not part of the record.
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major_range(MIN_DEVICE_MAJOR, Self::DEVICE_VERSION.major)?;
        let major = r.header().device_version.major;

        let nested = r
            .bytes(TAG_PCI_FUNCTION)
            .ok_or(SnapshotError::Corrupt("missing PCI function state"))?;
        let mut function = PciFunctionState::default();
        function.load_state(nested)?;

        let mac = if major >= 2 {
            let raw = r
                .bytes(TAG_MAC)
                .ok_or(SnapshotError::Corrupt("missing station address"))?;
            let octets: [u8; 6] = raw
                .try_into()
                .map_err(|_| SnapshotError::InvalidFieldEncoding("station address"))?;
            let mac = MacAddr::new(octets);
            check_station_address(mac)
                .map_err(|_| SnapshotError::InvalidFieldEncoding("station address"))?;
            Some(mac)
        } else {
            None
        };

        let mut guard = self.state().borrow_mut();
        let state = &mut *guard;
        if function.bdf != state.bdf {
            return Err(SnapshotError::InvalidFieldEncoding("PCI function address"));
        }
        if function.config.vendor_device_id() != state.config.vendor_device_id() {
            return Err(SnapshotError::InvalidFieldEncoding("PCI vendor/device id"));
        }

        state.config.restore_state(&function.config);
        if let Some(mac) = mac {
            state.mac = mac;
            if let Some(nic) = state.res.nic.as_mut() {
                nic.set_mac(mac);
            }
        }
        state.res.sync_irq(&state.config);

        if state.is_live() {
            tracing::debug!(bdf = %state.bdf, major, "tulip state restored");
            let (controller, mut bus) = state.split();
            controller.reset(&mut bus);
        }
        Ok(())
    }
}
