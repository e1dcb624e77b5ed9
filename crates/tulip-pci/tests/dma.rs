mod common;

use common::{InitPlan, Rig, CSR1, CSR3, CSR4, CSR5, CSR5_RI, CSR6, CSR6_SR, CSR7};
use tulip_pci::{TULIP_IO_BAR, TULIP_MMIO_BAR};

const TX_BUF: u32 = 0x2000;
const RX_BUF: u32 = 0x3000;

fn frame(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[test]
fn transmit_reads_the_frame_from_guest_memory() {
    let mut rig = Rig::new(InitPlan::default());
    rig.enable_bus_master();

    let payload = frame(64, 0x10);
    rig.fabric.guest_write(u64::from(TX_BUF), &payload);
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR4, TX_BUF);
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR1, payload.len() as u32);

    assert_eq!(rig.backend.pop_transmitted(), Some(payload));
    assert_eq!(rig.backend.stats().tx_frames, 1);
}

#[test]
fn transmit_without_bus_master_sees_an_open_bus() {
    let mut rig = Rig::new(InitPlan::default());

    rig.fabric.guest_write(u64::from(TX_BUF), &frame(16, 0));
    rig.fabric.csr_write(TULIP_IO_BAR, CSR4, TX_BUF);
    rig.fabric.csr_write(TULIP_IO_BAR, CSR1, 16);

    assert_eq!(rig.backend.pop_transmitted(), Some(vec![0xFF; 16]));
}

#[test]
fn receive_writes_into_guest_memory_only_while_mastering() {
    let mut rig = Rig::new(InitPlan::default());
    rig.fabric.csr_write(TULIP_IO_BAR, CSR3, RX_BUF);
    rig.fabric.csr_write(TULIP_IO_BAR, CSR6, CSR6_SR);

    // BME clear: the controller accepts the frame but its DMA writes go nowhere.
    assert!(rig.backend.inject(frame(32, 0x40)));
    assert_eq!(rig.fabric.guest_read(u64::from(RX_BUF), 32), vec![0; 32]);

    rig.enable_bus_master();
    let payload = frame(32, 0x80);
    assert!(rig.backend.inject(payload.clone()));
    assert_eq!(rig.fabric.guest_read(u64::from(RX_BUF), 32), payload);
}

#[test]
fn receive_interrupt_follows_intx_disable() {
    let mut rig = Rig::new(InitPlan::default());
    rig.enable_bus_master();
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR3, RX_BUF);
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR6, CSR6_SR);
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR7, CSR5_RI);

    rig.backend.inject(frame(60, 0));
    assert!(rig.fabric.irq_level(), "RI pending and enabled");

    // PCI command bit 10 masks the line without touching controller state.
    rig.dev.config_write(0x04, 2, 0x0007 | (1 << 10));
    assert!(!rig.fabric.irq_level());
    assert_eq!(rig.fabric.csr_read(TULIP_MMIO_BAR, CSR5) & CSR5_RI, CSR5_RI);

    rig.dev.config_write(0x04, 2, 0x0007);
    assert!(rig.fabric.irq_level());

    // Acknowledge.
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR5, CSR5_RI);
    assert!(!rig.fabric.irq_level());
}

#[test]
fn interrupt_raised_while_masked_appears_on_unmask() {
    let mut rig = Rig::new(InitPlan::default());
    rig.enable_bus_master();
    rig.dev.config_write(0x04, 2, 0x0007 | (1 << 10));
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR3, RX_BUF);
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR6, CSR6_SR);
    rig.fabric.csr_write(TULIP_MMIO_BAR, CSR7, CSR5_RI);

    rig.backend.inject(frame(60, 0));
    assert!(!rig.fabric.irq_level());
    assert_eq!(rig.fabric.irq_transitions(), 0);

    rig.dev.config_write(0x04, 2, 0x0007);
    assert!(rig.fabric.irq_level());
    assert_eq!(rig.fabric.irq_transitions(), 1);
}
