//! DMA memory
//!
//! The engine never maps or pins memory itself. Callers hand it buffers that
//! are already locked down and describe their physical layout through
//! [`DmaBuffer`]; the per-device descriptor and spill buffers come from a
//! [`DmaAllocator`] as [`CommonBuffer`]s.
//!
//! # Architecture
//!
//! - [`sg`]: turns a buffer's segments into the hardware descriptor list
//! - [`spill`]: the device-wide scratch buffer for partial receive words

pub mod sg;
pub mod spill;

use crate::error::ConfigResult;

pub use sg::{SgElement, SgList};
pub use spill::SpillBuffer;

/// A physically contiguous run of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhysSegment {
    /// Bus address of the first byte
    pub addr: u64,
    /// Length in bytes
    pub len: usize,
}

impl PhysSegment {
    /// Create a segment
    pub const fn new(addr: u64, len: usize) -> Self {
        Self { addr, len }
    }

    /// Bus address one past the last byte
    #[inline(always)]
    pub const fn end(&self) -> u64 {
        self.addr + self.len as u64
    }
}

/// A caller buffer locked for DMA.
///
/// `segments` lists the buffer's bytes in order. The buffer moves into the
/// engine with its request and comes back in the completion.
pub trait DmaBuffer: Send {
    /// Length in bytes
    fn len(&self) -> usize;

    /// Check if the buffer is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical layout, in buffer order
    fn segments(&self) -> &[PhysSegment];

    /// Copy bytes out of the buffer starting at `offset`
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize;

    /// Copy bytes into the buffer starting at `offset`.
    ///
    /// Returns the number of bytes written, which is short at the end of
    /// the buffer.
    fn write_at(&mut self, offset: usize, src: &[u8]) -> usize;
}

/// A physically contiguous buffer shared between host and FPGA.
pub trait CommonBuffer: Send {
    /// Bus address the FPGA uses
    fn phys_addr(&self) -> u64;

    /// Length in bytes
    fn len(&self) -> usize;

    /// Check if the buffer is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy bytes out of the buffer starting at `offset`
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize;

    /// Copy bytes into the buffer starting at `offset`
    fn write_at(&mut self, offset: usize, src: &[u8]) -> usize;

    /// Clear `offset..len` to zero
    fn zero_from(&mut self, offset: usize) {
        const ZEROS: [u8; 64] = [0; 64];
        let mut at = offset;
        while at < self.len() {
            let n = (self.len() - at).min(ZEROS.len());
            at += self.write_at(at, &ZEROS[..n]).max(1);
        }
    }
}

/// Source of common buffers, supplied by the embedding driver
pub trait DmaAllocator: Send + Sync {
    /// Allocate a zeroed, physically contiguous buffer of `size` bytes
    fn alloc_common(&self, size: usize) -> ConfigResult<Box<dyn CommonBuffer>>;
}
