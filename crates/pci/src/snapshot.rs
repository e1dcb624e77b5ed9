use io_snapshot::codec::{Decoder, Encoder};
use io_snapshot::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};

use crate::config::PCI_CONFIG_SPACE_SIZE;
use crate::{PciBdf, PciConfigSpace, PciConfigSpaceState};

/// Snapshot of one PCI function's bus-visible state: where it sits and what the guest has
/// programmed into its configuration space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciFunctionState {
    pub bdf: PciBdf,
    pub config: PciConfigSpaceState,
}

impl PciFunctionState {
    const TAG_BDF: u16 = 1;
    const TAG_CONFIG_BYTES: u16 = 2;
    const TAG_BAR_BASE: u16 = 3;
    const TAG_BAR_PROBE: u16 = 4;

    pub fn capture(bdf: PciBdf, config: &PciConfigSpace) -> Self {
        Self {
            bdf,
            config: config.snapshot_state(),
        }
    }
}

impl Default for PciFunctionState {
    fn default() -> Self {
        Self {
            bdf: PciBdf::new(0, 0, 0),
            config: PciConfigSpaceState {
                bytes: [0; PCI_CONFIG_SPACE_SIZE],
                bar_base: [0; 6],
                bar_probe: [false; 6],
            },
        }
    }
}

impl IoSnapshot for PciFunctionState {
    const DEVICE_ID: [u8; 4] = *b"PCIF";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u16(Self::TAG_BDF, self.bdf.pack_u16());
        w.field_bytes(Self::TAG_CONFIG_BYTES, self.config.bytes.to_vec());

        let bases = self
            .config
            .bar_base
            .iter()
            .fold(Encoder::new(), |e, base| e.u32(*base));
        w.field_bytes(Self::TAG_BAR_BASE, bases.finish());

        let probes = self
            .config
            .bar_probe
            .iter()
            .fold(Encoder::new(), |e, probe| e.bool(*probe));
        w.field_bytes(Self::TAG_BAR_PROBE, probes.finish());

        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        let bdf = r
            .u16(Self::TAG_BDF)?
            .map(PciBdf::unpack_u16)
            .ok_or(SnapshotError::Corrupt("missing PCI function address"))?;

        let raw = r
            .bytes(Self::TAG_CONFIG_BYTES)
            .ok_or(SnapshotError::Corrupt("missing PCI config bytes"))?;
        let config_bytes: [u8; PCI_CONFIG_SPACE_SIZE] = raw
            .try_into()
            .map_err(|_| SnapshotError::InvalidFieldEncoding("PCI config bytes"))?;

        let mut bar_base = [0u32; 6];
        if let Some(buf) = r.bytes(Self::TAG_BAR_BASE) {
            let mut d = Decoder::new(buf);
            for base in bar_base.iter_mut() {
                *base = d.u32()?;
            }
            d.finish()?;
        }

        let mut bar_probe = [false; 6];
        if let Some(buf) = r.bytes(Self::TAG_BAR_PROBE) {
            let mut d = Decoder::new(buf);
            for probe in bar_probe.iter_mut() {
                *probe = d.bool()?;
            }
            d.finish()?;
        }

        self.bdf = bdf;
        self.config = PciConfigSpaceState {
            bytes: config_bytes,
            bar_base,
            bar_probe,
        };
        Ok(())
    }
}
