//! Spill buffer
//!
//! The FPGA moves whole words. A receive whose length is not a multiple of
//! the word size gets its last partial word steered into this per-device
//! scratch buffer by an extra descriptor element. At completion the valid
//! tail bytes are copied into the caller's buffer.
//!
//! A receive armed while an announcement is held knows how much the FPGA
//! will send. If that is more than the buffer takes, drain elements pointing
//! at the spill buffer (past word 0) absorb the excess, which is discarded.
//! An announcement that arrives after arming cannot grow the list; the FPGA
//! stalls on the excess until the deadline or a cancel ends the receive.
//!
//! One transaction owns the buffer at a time. Claiming clears it so a short
//! transfer never exposes bytes left over from an earlier one.

use super::{CommonBuffer, DmaBuffer};
use crate::channel::ChannelKey;

/// Device-wide scratch buffer for partial receive words
pub struct SpillBuffer {
    buffer: Box<dyn CommonBuffer>,
    owner: Option<ChannelKey>,
}

impl SpillBuffer {
    /// Wrap an allocated common buffer
    pub fn new(buffer: Box<dyn CommonBuffer>) -> Self {
        Self {
            buffer,
            owner: None,
        }
    }

    /// Bus address for the descriptor element
    pub fn phys_addr(&self) -> u64 {
        self.buffer.phys_addr()
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Channel-direction currently holding the buffer
    pub fn owner(&self) -> Option<ChannelKey> {
        self.owner
    }

    /// Take the buffer for `key`, clearing its contents.
    ///
    /// Returns `false` if another channel-direction holds it.
    pub fn claim(&mut self, key: ChannelKey) -> bool {
        match self.owner {
            Some(owner) if owner != key => false,
            _ => {
                self.owner = Some(key);
                self.buffer.zero_from(0);
                true
            }
        }
    }

    /// Give the buffer back. Returns `false` if `key` did not hold it.
    pub fn release(&mut self, key: ChannelKey) -> bool {
        if self.owner == Some(key) {
            self.owner = None;
            true
        } else {
            false
        }
    }

    /// Drop any claim (device reset)
    pub fn release_all(&mut self) {
        self.owner = None;
    }

    /// Copy the first `len` spilled bytes into `dst` at `dst_offset`
    pub fn copy_tail(&self, dst: &mut dyn DmaBuffer, dst_offset: usize, len: usize) -> usize {
        let mut staged = [0u8; 64];
        let mut copied = 0;
        let len = len.min(self.buffer.len());
        while copied < len {
            let n = (len - copied).min(staged.len());
            let read = self.buffer.read_at(copied, &mut staged[..n]);
            let written = dst.write_at(dst_offset + copied, &staged[..read]);
            if written == 0 {
                break;
            }
            copied += written;
        }
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Direction;
    use crate::dma::DmaAllocator;
    use crate::testing::SimMemory;

    fn spill(mem: &SimMemory) -> SpillBuffer {
        SpillBuffer::new(mem.alloc_common(4096).unwrap())
    }

    #[test]
    fn claim_is_exclusive() {
        let mem = SimMemory::new();
        let mut spill = spill(&mem);
        let a = ChannelKey::new(0, Direction::Receive);
        let b = ChannelKey::new(1, Direction::Receive);

        assert!(spill.claim(a));
        assert!(!spill.claim(b));
        assert!(!spill.release(b));
        assert!(spill.release(a));
        assert!(spill.claim(b));
        assert_eq!(spill.owner(), Some(b));
    }

    #[test]
    fn claim_clears_stale_bytes() {
        let mem = SimMemory::new();
        let mut spill = spill(&mem);
        mem.write_phys(spill.phys_addr(), &[0xEE; 8]);

        assert!(spill.claim(ChannelKey::new(0, Direction::Receive)));

        let mut raw = [0xFFu8; 8];
        mem.read_phys(spill.phys_addr(), &mut raw);
        assert_eq!(raw, [0; 8]);
    }

    #[test]
    fn copy_tail_lands_at_offset() {
        let mem = SimMemory::new();
        let spill = spill(&mem);
        mem.write_phys(spill.phys_addr(), &[1, 2, 3, 4]);

        let mut dst = mem.contiguous(8);
        assert_eq!(spill.copy_tail(&mut dst, 5, 3), 3);

        let mut out = [0u8; 8];
        dst.read_at(0, &mut out);
        assert_eq!(out, [0, 0, 0, 0, 0, 1, 2, 3]);
    }
}
