use thiserror::Error;

use crate::bus::MemoryBus;

/// Errors returned by [`DenseMemory`] range checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    /// The requested address range is outside the guest physical memory size.
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    /// The requested size cannot be represented by the current platform's `usize`.
    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Dense (contiguous) guest RAM starting at guest-physical address 0.
///
/// As a [`MemoryBus`], accesses outside the backing store behave like unassigned address space:
/// reads return all-ones and writes are discarded. The checked accessors
/// ([`DenseMemory::read_into`], [`DenseMemory::write_from`]) report the error instead.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    pub fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn range_to_usize(&self, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
        let size = self.size();
        let out_of_range = GuestMemoryError::OutOfRange { paddr, len, size };
        let end = paddr
            .checked_add(len as u64)
            .ok_or_else(|| out_of_range.clone())?;
        if end > size {
            return Err(out_of_range);
        }
        // `end <= size` and `size` came from a `usize`, so both fit.
        Ok((paddr as usize, end as usize))
    }
}

impl MemoryBus for DenseMemory {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        if self.read_into(paddr, buf).is_err() {
            buf.fill(0xFF);
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        let _ = self.write_from(paddr, buf);
    }
}
