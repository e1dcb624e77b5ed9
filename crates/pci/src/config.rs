use crate::{PCI_COMMAND_BUS_MASTER, PCI_COMMAND_INTX_DISABLE};

pub const PCI_CONFIG_SPACE_SIZE: usize = 256;

const BAR_COUNT: usize = 6;
const BAR0_OFFSET: usize = 0x10;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciVendorDeviceId {
    pub vendor_id: u16,
    pub device_id: u16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PciBarKind {
    Io,
    Mmio32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PciBarDefinition {
    Io { size: u32 },
    Mmio32 { size: u32, prefetchable: bool },
}

impl PciBarDefinition {
    pub fn kind(&self) -> PciBarKind {
        match self {
            Self::Io { .. } => PciBarKind::Io,
            Self::Mmio32 { .. } => PciBarKind::Mmio32,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Io { size } | Self::Mmio32 { size, .. } => u64::from(*size),
        }
    }

    fn size_mask(&self) -> u32 {
        match self {
            Self::Io { size } => !(size.saturating_sub(1)) & 0xFFFF_FFFC,
            Self::Mmio32 { size, .. } => !(size.saturating_sub(1)) & 0xFFFF_FFF0,
        }
    }

    fn type_bits(&self) -> u32 {
        match self {
            Self::Io { .. } => 0x1,
            Self::Mmio32 { prefetchable, .. } => {
                if *prefetchable {
                    1 << 3
                } else {
                    0
                }
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciBarRange {
    pub kind: PciBarKind,
    pub base: u64,
    pub size: u64,
}

impl PciBarRange {
    pub fn end_exclusive(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PciBarState {
    def: Option<PciBarDefinition>,
    base: u32,
    probe: bool,
}

/// PCI configuration space for a Type 0 (endpoint) header.
///
/// Supports byte/word/dword config reads and writes, guest-read-only header fields and BAR size
/// probing (write `0xFFFF_FFFF`, read back the size mask).
#[derive(Debug, Clone)]
pub struct PciConfigSpace {
    bytes: [u8; PCI_CONFIG_SPACE_SIZE],
    bars: [PciBarState; BAR_COUNT],
}

/// Serializable config-space runtime state: the raw bytes plus BAR decode/probe state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciConfigSpaceState {
    pub bytes: [u8; PCI_CONFIG_SPACE_SIZE],
    pub bar_base: [u32; BAR_COUNT],
    pub bar_probe: [bool; BAR_COUNT],
}

impl PciConfigSpaceState {
    pub fn vendor_device_id(&self) -> PciVendorDeviceId {
        PciVendorDeviceId {
            vendor_id: u16::from_le_bytes([self.bytes[0x00], self.bytes[0x01]]),
            device_id: u16::from_le_bytes([self.bytes[0x02], self.bytes[0x03]]),
        }
    }
}

impl PciConfigSpace {
    pub const COMMAND_OFFSET: u16 = 0x04;
    pub const STATUS_OFFSET: u16 = 0x06;
    pub const CACHE_LINE_SIZE_OFFSET: u16 = 0x0C;
    pub const HEADER_TYPE_OFFSET: u16 = 0x0E;
    pub const INTERRUPT_LINE_OFFSET: u16 = 0x3C;
    pub const INTERRUPT_PIN_OFFSET: u16 = 0x3D;

    pub fn new(vendor_id: u16, device_id: u16) -> Self {
        let mut bytes = [0u8; PCI_CONFIG_SPACE_SIZE];
        bytes[0x00..0x02].copy_from_slice(&vendor_id.to_le_bytes());
        bytes[0x02..0x04].copy_from_slice(&device_id.to_le_bytes());
        Self {
            bytes,
            bars: [PciBarState::default(); BAR_COUNT],
        }
    }

    pub fn vendor_device_id(&self) -> PciVendorDeviceId {
        PciVendorDeviceId {
            vendor_id: u16::from_le_bytes([self.bytes[0x00], self.bytes[0x01]]),
            device_id: u16::from_le_bytes([self.bytes[0x02], self.bytes[0x03]]),
        }
    }

    /// Sets the 24-bit class code (`class << 8 | subclass`, plus `prog_if`) and revision.
    pub fn set_class_code(&mut self, class: u8, subclass: u8, prog_if: u8, revision_id: u8) {
        self.bytes[0x08] = revision_id;
        self.bytes[0x09] = prog_if;
        self.bytes[0x0a] = subclass;
        self.bytes[0x0b] = class;
    }

    pub fn revision_id(&self) -> u8 {
        self.bytes[0x08]
    }

    pub fn class(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x0a], self.bytes[0x0b]])
    }

    pub fn command(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x04], self.bytes[0x05]])
    }

    pub fn set_command(&mut self, command: u16) {
        self.bytes[0x04..0x06].copy_from_slice(&command.to_le_bytes());
    }

    pub fn bus_master_enabled(&self) -> bool {
        self.command() & PCI_COMMAND_BUS_MASTER != 0
    }

    pub fn intx_disabled(&self) -> bool {
        self.command() & PCI_COMMAND_INTX_DISABLE != 0
    }

    pub fn cache_line_size(&self) -> u8 {
        self.bytes[usize::from(Self::CACHE_LINE_SIZE_OFFSET)]
    }

    pub fn set_cache_line_size(&mut self, size: u8) {
        self.bytes[usize::from(Self::CACHE_LINE_SIZE_OFFSET)] = size;
    }

    pub fn header_type(&self) -> u8 {
        self.bytes[usize::from(Self::HEADER_TYPE_OFFSET)]
    }

    pub fn interrupt_line(&self) -> u8 {
        self.bytes[usize::from(Self::INTERRUPT_LINE_OFFSET)]
    }

    pub fn interrupt_pin(&self) -> u8 {
        self.bytes[usize::from(Self::INTERRUPT_PIN_OFFSET)]
    }

    /// Interrupt Pin (0x3D) is read-only from the guest's perspective; device code sets it here.
    pub fn set_interrupt_pin(&mut self, pin: u8) {
        self.bytes[usize::from(Self::INTERRUPT_PIN_OFFSET)] = pin;
    }

    pub fn set_bar_definition(&mut self, index: u8, def: PciBarDefinition) {
        let index = usize::from(index);
        assert!(index < BAR_COUNT, "BAR index {index} out of range");
        let size = def.size();
        assert!(size.is_power_of_two(), "PCI BAR size must be a power of two");
        match def.kind() {
            PciBarKind::Io => assert!(size >= 4, "PCI I/O BAR size must be at least 4 bytes"),
            PciBarKind::Mmio32 => {
                assert!(size >= 0x10, "PCI MMIO BAR size must be at least 16 bytes")
            }
        }

        self.bars[index] = PciBarState {
            def: Some(def),
            base: 0,
            probe: false,
        };
        self.sync_bar_bytes(index);
    }

    pub fn bar_definition(&self, index: u8) -> Option<PciBarDefinition> {
        self.bars.get(usize::from(index)).and_then(|bar| bar.def)
    }

    pub fn bar_range(&self, index: u8) -> Option<PciBarRange> {
        let bar = self.bars.get(usize::from(index))?;
        let def = bar.def?;
        Some(PciBarRange {
            kind: def.kind(),
            base: u64::from(bar.base),
            size: def.size(),
        })
    }

    pub fn read(&self, offset: u16, size: usize) -> u32 {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        assert!(offset + size <= PCI_CONFIG_SPACE_SIZE);

        if (BAR0_OFFSET..BAR0_OFFSET + BAR_COUNT * 4).contains(&offset) {
            let aligned = offset & !0x3;
            let value = self.read_bar_register((aligned - BAR0_OFFSET) / 4);
            let shifted = value >> ((offset - aligned) * 8);
            return match size {
                1 => shifted & 0xFF,
                2 => shifted & 0xFFFF,
                _ => shifted,
            };
        }

        (0..size).fold(0u32, |acc, i| {
            acc | (u32::from(self.bytes[offset + i]) << (8 * i))
        })
    }

    pub fn write(&mut self, offset: u16, size: usize, value: u32) {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        assert!(offset + size <= PCI_CONFIG_SPACE_SIZE);

        if (BAR0_OFFSET..BAR0_OFFSET + BAR_COUNT * 4).contains(&offset) {
            // BAR writes must be aligned dword accesses; anything else is dropped.
            if offset & 0x3 == 0 && size == 4 {
                self.write_bar_register((offset - BAR0_OFFSET) / 4, value);
            }
            return;
        }

        for i in 0..size {
            let addr = offset + i;
            if Self::is_read_only_byte(addr) {
                continue;
            }
            self.bytes[addr] = (value >> (8 * i)) as u8;
        }
    }

    pub fn snapshot_state(&self) -> PciConfigSpaceState {
        PciConfigSpaceState {
            bytes: self.bytes,
            bar_base: core::array::from_fn(|i| self.bars[i].base),
            bar_probe: core::array::from_fn(|i| self.bars[i].probe),
        }
    }

    /// Restores guest-programmable state, including the cache line size. Identity and other
    /// device-defined read-only fields keep the values of `self`.
    pub fn restore_state(&mut self, state: &PciConfigSpaceState) {
        let previous = self.bytes;
        self.bytes = state.bytes;
        for addr in 0..PCI_CONFIG_SPACE_SIZE {
            if Self::is_read_only_byte(addr) {
                self.bytes[addr] = previous[addr];
            }
        }

        for i in 0..BAR_COUNT {
            if let Some(def) = self.bars[i].def {
                self.bars[i].base = state.bar_base[i] & def.size_mask();
                self.bars[i].probe = state.bar_probe[i];
                self.sync_bar_bytes(i);
            }
        }
    }

    fn is_read_only_byte(addr: usize) -> bool {
        addr < 0x04
            || (0x06..0x0C).contains(&addr)
            || addr == usize::from(Self::HEADER_TYPE_OFFSET)
            || (0x2C..0x30).contains(&addr)
            || addr == 0x34
            || addr == usize::from(Self::INTERRUPT_PIN_OFFSET)
    }

    fn read_bar_register(&self, index: usize) -> u32 {
        let bar = &self.bars[index];
        let Some(def) = bar.def else {
            return 0;
        };
        if bar.probe {
            def.size_mask() | def.type_bits()
        } else {
            (bar.base & def.size_mask()) | def.type_bits()
        }
    }

    fn write_bar_register(&mut self, index: usize, value: u32) {
        let Some(def) = self.bars[index].def else {
            return;
        };
        if value == 0xFFFF_FFFF {
            self.bars[index].probe = true;
            return;
        }
        self.bars[index].base = value & def.size_mask();
        self.bars[index].probe = false;
        self.sync_bar_bytes(index);
    }

    fn sync_bar_bytes(&mut self, index: usize) {
        let value = self.read_bar_register(index);
        let off = BAR0_OFFSET + index * 4;
        self.bytes[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }
}
