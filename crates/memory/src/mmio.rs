/// Handler for a bus-assigned register window (an MMIO or I/O BAR).
///
/// `offset` is relative to the start of the window. `size` is the access width in bytes as issued
/// by the guest; handlers that only implement a subset of widths decide for themselves what an
/// unsupported access does (conventionally: reads float high, writes are dropped).
pub trait MmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64;
    fn write(&mut self, offset: u64, size: usize, value: u64);
}

impl<T: MmioHandler + ?Sized> MmioHandler for Box<T> {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        <T as MmioHandler>::read(&mut **self, offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        <T as MmioHandler>::write(&mut **self, offset, size, value);
    }
}

