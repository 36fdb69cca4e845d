//! Scatter-gather descriptor lists
//!
//! A list is rebuilt for every transaction from the buffer's physical
//! segments, merging runs that are contiguous on the bus. It is bounded by the
//! channel's element budget: a list that would need more elements is refused
//! outright, never truncated.
//!
//! # Element layout
//!
//! Each element is four little-endian 32-bit words:
//!
//! | Word | Contents                       |
//! |------|--------------------------------|
//! | 0    | bus address, low 32 bits       |
//! | 1    | bus address, high 32 bits      |
//! | 2    | length in words                |
//! | 3    | reserved, zero                 |

use super::{CommonBuffer, PhysSegment};
use crate::constants::{SG_ELEMENT_SIZE, SG_ELEMENT_WORDS, WORD_SIZE};
use crate::error::{Error, RequestError, Result, TransferError};

/// One descriptor list element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SgElement {
    /// Bus address
    pub addr: u64,
    /// Length in bytes
    pub len: usize,
}

impl SgElement {
    /// Length in words, rounding a partial trailing word up
    #[inline(always)]
    pub const fn words(&self) -> u32 {
        self.len.div_ceil(WORD_SIZE) as u32
    }

    /// Encoded element words
    pub const fn to_words(&self) -> [u32; SG_ELEMENT_WORDS] {
        [self.addr as u32, (self.addr >> 32) as u32, self.words(), 0]
    }

    fn end(&self) -> u64 {
        self.addr + self.len as u64
    }
}

/// Descriptor list for one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SgList {
    elements: Vec<SgElement>,
}

impl SgList {
    /// Create an empty list
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    /// Build a list covering the first `len` bytes of `segments`.
    ///
    /// # Errors
    ///
    /// - `MisalignedBuffer` if a segment starts off a word boundary, or a
    ///   partial word would fall anywhere but the very end
    /// - `InvalidLength` if the segments hold fewer than `len` bytes
    /// - `CapacityExceeded` if more than `max_elements` are needed
    pub fn build(segments: &[PhysSegment], len: usize, max_elements: usize) -> Result<Self> {
        let mut list = Self::new();
        let mut remaining = len;

        for seg in segments.iter().filter(|s| s.len > 0) {
            if remaining == 0 {
                break;
            }
            if seg.addr % WORD_SIZE as u64 != 0 {
                return Err(RequestError::MisalignedBuffer.into());
            }
            let take = seg.len.min(remaining);
            list.push_merged(seg.addr, take, max_elements)?;
            remaining -= take;
        }

        if remaining > 0 {
            return Err(RequestError::InvalidLength.into());
        }

        let interior = list.elements.len().saturating_sub(1);
        if list.elements[..interior]
            .iter()
            .any(|e| e.len % WORD_SIZE != 0)
        {
            return Err(RequestError::MisalignedBuffer.into());
        }

        Ok(list)
    }

    /// Append the spill buffer as a separate trailing element
    pub fn push_spill(&mut self, addr: u64, len: usize, max_elements: usize) -> Result<()> {
        if self.elements.len() >= max_elements {
            return Err(TransferError::CapacityExceeded.into());
        }
        self.elements.push(SgElement { addr, len });
        Ok(())
    }

    /// Append elements that all target `addr..addr + len` until `excess`
    /// more bytes are covered or the list reaches `max_elements`.
    ///
    /// Returns the bytes still uncovered.
    pub fn push_drain(
        &mut self,
        addr: u64,
        len: usize,
        excess: usize,
        max_elements: usize,
    ) -> usize {
        let mut left = excess;
        while left > 0 && len > 0 && self.elements.len() < max_elements {
            self.elements.push(SgElement { addr, len });
            left = left.saturating_sub(len);
        }
        left
    }

    fn push_merged(&mut self, addr: u64, len: usize, max_elements: usize) -> Result<()> {
        if let Some(prev) = self.elements.last_mut()
            && prev.end() == addr
        {
            prev.len += len;
            return Ok(());
        }
        if self.elements.len() >= max_elements {
            return Err(Error::Transfer(TransferError::CapacityExceeded));
        }
        self.elements.push(SgElement { addr, len });
        Ok(())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in hardware order
    pub fn elements(&self) -> &[SgElement] {
        &self.elements
    }

    /// Bytes the FPGA can write through the list
    pub fn covered(&self) -> usize {
        self.elements.iter().map(|e| e.len).sum()
    }

    /// Value for the SG_LEN register
    pub fn list_words(&self) -> u32 {
        (self.elements.len() * SG_ELEMENT_WORDS) as u32
    }

    /// Serialized size in bytes
    pub fn byte_size(&self) -> usize {
        self.elements.len() * SG_ELEMENT_SIZE
    }

    /// Write the list to the front of `buf` and zero the rest.
    ///
    /// The whole buffer is rewritten so no element of an earlier list can be
    /// read back.
    pub fn write_to(&self, buf: &mut dyn CommonBuffer) -> Result<()> {
        if self.byte_size() > buf.len() {
            return Err(TransferError::CapacityExceeded.into());
        }
        let mut encoded = [0u8; SG_ELEMENT_SIZE];
        for (i, element) in self.elements.iter().enumerate() {
            for (chunk, word) in encoded.chunks_exact_mut(WORD_SIZE).zip(element.to_words()) {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            buf.write_at(i * SG_ELEMENT_SIZE, &encoded);
        }
        buf.zero_from(self.byte_size());
        Ok(())
    }
}
