//! Testing utilities and mock implementations
//!
//! This module provides mock hardware for exercising the engine on the host:
//! a register bank, a simulated DMA address space and a simulated FPGA that
//! walks the descriptor lists the engine programs.
//!
//! Only available when running `cargo test`.

// Note: The #[cfg(test)] attribute is applied in lib.rs where this module is declared
#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::Direction;
use crate::constants::{CHANNELS_PER_VECTOR, IRQ_BITS_PER_CHANNEL, SG_ELEMENT_SIZE, WORD_SIZE};
use crate::dma::{CommonBuffer, DmaAllocator, DmaBuffer, PhysSegment};
use crate::error::{ConfigError, ConfigResult};
use crate::interrupt::{
    IRQ_RECV_DONE, IRQ_RECV_NEW_TXN, IRQ_RECV_SG_READ, IRQ_SEND_DONE, IRQ_SEND_SG_READ, Signal,
};
use crate::register::channel::{
    RX_LEN_REG, RX_SG_ADDR_HI_REG, RX_SG_ADDR_LO_REG, RX_SG_LEN_REG, RX_TNFR_LEN_REG,
    TX_LEN_REG, TX_OFFLAST_REG, TX_SG_ADDR_HI_REG, TX_SG_ADDR_LO_REG, TX_SG_LEN_REG,
    TX_TNFR_LEN_REG, pack_offlast,
};
use crate::register::info::{INFO_BUS_MASTER, INFO_BUS_WIDTH_SHIFT, INFO_LINK_WIDTH_SHIFT};
use crate::register::{INFO_REG, IRQ_0_REG, IRQ_1_REG, RegisterBank, chnl_reg};

// =============================================================================
// Mock Register Bank
// =============================================================================

#[derive(Debug, Default)]
struct RegState {
    registers: HashMap<usize, u32>,
    write_log: Vec<(usize, u32)>,
}

/// Mock BAR0 for testing the engine without hardware
///
/// Unset registers read as zero. The two interrupt vectors clear on read,
/// like the real ones.
///
/// # Example
///
/// ```ignore
/// let regs = MockRegisters::new();
/// regs.raise(2, Direction::Receive, Signal::Done);
/// device.handle_interrupt();
/// ```
#[derive(Debug, Default)]
pub struct MockRegisters {
    state: Mutex<RegState>,
}

impl MockRegisters {
    /// Create a new mock register bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bank whose info word reports `channels` on a 64-bit bus
    pub fn with_info(channels: u32) -> Self {
        let regs = Self::new();
        regs.set(chnl_reg(0, INFO_REG), info_word(channels, 2));
        regs
    }

    /// Set a register value without logging a write
    pub fn set(&self, index: usize, value: u32) {
        self.state.lock().registers.insert(index, value);
    }

    /// Current value of a register (does not clear interrupt vectors)
    pub fn get(&self, index: usize) -> u32 {
        self.state.lock().registers.get(&index).copied().unwrap_or(0)
    }

    /// All writes made through the bank, in order
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state.lock().write_log.clone()
    }

    /// Clear the write log
    pub fn clear_writes(&self) {
        self.state.lock().write_log.clear();
    }

    /// Latch an interrupt bit
    pub fn raise(&self, channel: usize, direction: Direction, signal: Signal) {
        let vector = if channel < 6 { IRQ_0_REG } else { IRQ_1_REG };
        let Some(bit) = irq_bit(channel, direction, signal) else {
            panic!("no {signal:?} interrupt on {direction:?}");
        };
        let mut state = self.state.lock();
        *state.registers.entry(chnl_reg(0, vector)).or_insert(0) |= bit;
    }

    /// Latch a raw value into interrupt vector `index`
    pub fn set_vector(&self, index: usize, raw: u32) {
        let vector = if index == 0 { IRQ_0_REG } else { IRQ_1_REG };
        self.set(chnl_reg(0, vector), raw);
    }
}

impl RegisterBank for MockRegisters {
    fn read(&self, index: usize) -> u32 {
        let mut state = self.state.lock();
        if index == chnl_reg(0, IRQ_0_REG) || index == chnl_reg(0, IRQ_1_REG) {
            state.registers.remove(&index).unwrap_or(0)
        } else {
            state.registers.get(&index).copied().unwrap_or(0)
        }
    }

    fn write(&self, index: usize, value: u32) {
        let mut state = self.state.lock();
        state.registers.insert(index, value);
        state.write_log.push((index, value));
    }
}

/// Info word for `channels` channels, x8 link, bus width `param` x 32 bits
pub fn info_word(channels: u32, param: u32) -> u32 {
    channels | INFO_BUS_MASTER | (8 << INFO_LINK_WIDTH_SHIFT) | (param << INFO_BUS_WIDTH_SHIFT)
}

/// Bit to set in vector `channel / 6` to raise `signal` on `direction`.
///
/// Sends have no announcement bit.
pub fn irq_bit(channel: usize, direction: Direction, signal: Signal) -> Option<u32> {
    let bit = match (direction, signal) {
        (Direction::Receive, Signal::NewTxn) => IRQ_RECV_NEW_TXN,
        (Direction::Receive, Signal::SgRead) => IRQ_RECV_SG_READ,
        (Direction::Receive, Signal::Done) => IRQ_RECV_DONE,
        (Direction::Send, Signal::SgRead) => IRQ_SEND_SG_READ,
        (Direction::Send, Signal::Done) => IRQ_SEND_DONE,
        (Direction::Send, Signal::NewTxn) => return None,
    };
    Some(bit << ((channel % CHANNELS_PER_VECTOR) * IRQ_BITS_PER_CHANNEL))
}

// =============================================================================
// Simulated DMA Memory
// =============================================================================

/// Simulated page size
pub const SIM_PAGE: usize = 4096;

/// Bus address of the first simulated page (above 4 GiB so the high address
/// registers are exercised)
pub const SIM_BASE: u64 = 0x1_0000_0000;

#[derive(Debug, Default)]
struct SimInner {
    bytes: Vec<u8>,
    page_limit: Option<usize>,
}

/// Simulated bus address space shared by host buffers and the FPGA
#[derive(Debug, Clone, Default)]
pub struct SimMemory {
    inner: Arc<Mutex<SimInner>>,
}

impl SimMemory {
    /// Create an empty address space
    pub fn new() -> Self {
        Self::default()
    }

    /// Address space that refuses to grow past `pages`
    pub fn limited(pages: usize) -> Self {
        let mem = Self::new();
        mem.inner.lock().page_limit = Some(pages);
        mem
    }

    fn alloc_pages(&self, pages: usize) -> Option<u64> {
        let mut inner = self.inner.lock();
        let used = inner.bytes.len() / SIM_PAGE;
        if inner.page_limit.is_some_and(|limit| used + pages > limit) {
            return None;
        }
        let offset = inner.bytes.len();
        inner.bytes.resize(offset + pages * SIM_PAGE, 0);
        Some(SIM_BASE + offset as u64)
    }

    /// Copy bytes out of the address space
    pub fn read_phys(&self, addr: u64, dst: &mut [u8]) {
        let inner = self.inner.lock();
        let start = (addr - SIM_BASE) as usize;
        dst.copy_from_slice(&inner.bytes[start..start + dst.len()]);
    }

    /// Copy bytes into the address space
    pub fn write_phys(&self, addr: u64, src: &[u8]) {
        let mut inner = self.inner.lock();
        let start = (addr - SIM_BASE) as usize;
        inner.bytes[start..start + src.len()].copy_from_slice(src);
    }

    /// Host buffer backed by one contiguous run of pages
    pub fn contiguous(&self, len: usize) -> HostBuffer {
        let pages = len.div_ceil(SIM_PAGE).max(1);
        let addr = self.alloc_pages(pages).unwrap();
        HostBuffer {
            mem: self.clone(),
            segments: vec![PhysSegment::new(addr, len)],
            len,
        }
    }

    /// Host buffer whose pages are all physically disjoint
    pub fn fragmented(&self, len: usize) -> HostBuffer {
        let mut segments = Vec::new();
        let mut remaining = len;
        while remaining > 0 {
            let addr = self.alloc_pages(1).unwrap();
            // Guard page keeps neighbours from merging
            self.alloc_pages(1).unwrap();
            let take = remaining.min(SIM_PAGE);
            segments.push(PhysSegment::new(addr, take));
            remaining -= take;
        }
        HostBuffer {
            mem: self.clone(),
            segments,
            len,
        }
    }

    /// Host buffer over caller-chosen segments (never backed by memory)
    pub fn with_segments(&self, segments: Vec<PhysSegment>) -> HostBuffer {
        let len = segments.iter().map(|s| s.len).sum();
        HostBuffer {
            mem: self.clone(),
            segments,
            len,
        }
    }
}

impl DmaAllocator for SimMemory {
    fn alloc_common(&self, size: usize) -> ConfigResult<Box<dyn CommonBuffer>> {
        let pages = size.div_ceil(SIM_PAGE).max(1);
        let addr = self.alloc_pages(pages).ok_or(ConfigError::AllocationFailed)?;
        Ok(Box::new(SimCommon {
            mem: self.clone(),
            addr,
            len: size,
        }))
    }
}

/// Contiguous common buffer in simulated memory
pub struct SimCommon {
    mem: SimMemory,
    addr: u64,
    len: usize,
}

impl CommonBuffer for SimCommon {
    fn phys_addr(&self) -> u64 {
        self.addr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len.saturating_sub(offset));
        self.mem.read_phys(self.addr + offset as u64, &mut dst[..n]);
        n
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> usize {
        let n = src.len().min(self.len.saturating_sub(offset));
        self.mem.write_phys(self.addr + offset as u64, &src[..n]);
        n
    }
}

/// Locked host buffer in simulated memory
#[derive(Debug, Clone)]
pub struct HostBuffer {
    mem: SimMemory,
    segments: Vec<PhysSegment>,
    len: usize,
}

impl HostBuffer {
    /// Fill the buffer from `data`
    pub fn fill(&mut self, data: &[u8]) {
        self.write_at(0, data);
    }

    /// Copy the whole buffer out
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.read_at(0, &mut out);
        out
    }

    /// Walk `offset..offset+len` as (bus address, buffer offset, length) runs
    fn runs(&self, offset: usize, len: usize) -> Vec<(u64, usize, usize)> {
        let end = (offset + len).min(self.len);
        let mut runs = Vec::new();
        let mut seg_start = 0;
        for seg in &self.segments {
            let seg_end = seg_start + seg.len;
            let lo = offset.max(seg_start);
            let hi = end.min(seg_end);
            if lo < hi {
                runs.push((seg.addr + (lo - seg_start) as u64, lo - offset, hi - lo));
            }
            seg_start = seg_end;
        }
        runs
    }
}

impl DmaBuffer for HostBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn segments(&self) -> &[PhysSegment] {
        &self.segments
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize {
        let mut total = 0;
        for (addr, at, n) in self.runs(offset, dst.len()) {
            self.mem.read_phys(addr, &mut dst[at..at + n]);
            total += n;
        }
        total
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> usize {
        let mut total = 0;
        for (addr, at, n) in self.runs(offset, src.len()) {
            self.mem.write_phys(addr, &src[at..at + n]);
            total += n;
        }
        total
    }
}

/// Deterministic test pattern
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

// =============================================================================
// Simulated FPGA
// =============================================================================

/// FPGA model that reads programmed descriptor lists and moves data
///
/// Each step latches interrupt bits but does not call the interrupt handler;
/// tests decide when the "interrupt" is taken.
#[derive(Clone)]
pub struct SimFpga {
    pub regs: Arc<MockRegisters>,
    pub mem: SimMemory,
}

impl SimFpga {
    /// FPGA with `channels` channels on a 64-bit bus
    pub fn new(channels: u32) -> Self {
        Self {
            regs: Arc::new(MockRegisters::with_info(channels)),
            mem: SimMemory::new(),
        }
    }

    /// Register bank handle for the device under test
    pub fn bank(&self) -> Arc<dyn RegisterBank> {
        self.regs.clone()
    }

    /// Check whether the engine has programmed a descriptor list
    pub fn armed(&self, channel: usize, direction: Direction) -> bool {
        let (_, words) = self.list_regs(channel, direction);
        words != 0
    }

    fn list_regs(&self, channel: usize, direction: Direction) -> (u64, u32) {
        let (lo, hi, len) = match direction {
            Direction::Send => (RX_SG_ADDR_LO_REG, RX_SG_ADDR_HI_REG, RX_SG_LEN_REG),
            Direction::Receive => (TX_SG_ADDR_LO_REG, TX_SG_ADDR_HI_REG, TX_SG_LEN_REG),
        };
        let addr = (u64::from(self.regs.get(chnl_reg(channel, hi))) << 32)
            | u64::from(self.regs.get(chnl_reg(channel, lo)));
        (addr, self.regs.get(chnl_reg(channel, len)))
    }

    /// Parse the programmed descriptor list as (bus address, length in bytes)
    pub fn descriptors(&self, channel: usize, direction: Direction) -> Vec<(u64, usize)> {
        let (addr, words) = self.list_regs(channel, direction);
        let count = words as usize / 4;
        if count == 0 {
            return Vec::new();
        }
        let mut raw = vec![0u8; count * SG_ELEMENT_SIZE];
        self.mem.read_phys(addr, &mut raw);
        raw.chunks_exact(SG_ELEMENT_SIZE)
            .map(|e| {
                let word = |i: usize| u32::from_le_bytes([e[4 * i], e[4 * i + 1], e[4 * i + 2], e[4 * i + 3]]);
                let addr = (u64::from(word(1)) << 32) | u64::from(word(0));
                (addr, word(2) as usize * WORD_SIZE)
            })
            .collect()
    }

    /// Latch descriptor-read-done
    pub fn ack_descriptors(&self, channel: usize, direction: Direction) {
        self.regs.raise(channel, direction, Signal::SgRead);
    }

    /// Take the host's send: gather its data, report the words moved and
    /// latch send done
    pub fn collect_send(&self, channel: usize) -> Vec<u8> {
        let words = self.regs.get(chnl_reg(channel, RX_LEN_REG)) as usize;
        let mut remaining = words * WORD_SIZE;
        let mut data = Vec::with_capacity(remaining);
        for (addr, len) in self.descriptors(channel, Direction::Send) {
            let take = len.min(remaining);
            let mut chunk = vec![0u8; take];
            self.mem.read_phys(addr, &mut chunk);
            data.extend_from_slice(&chunk);
            remaining -= take;
        }
        self.regs.set(chnl_reg(channel, RX_TNFR_LEN_REG), words as u32);
        self.regs.raise(channel, Direction::Send, Signal::Done);
        data
    }

    /// Announce a send of `len` bytes to the host
    pub fn announce(&self, channel: usize, len: usize, offset: u32, last: bool) {
        self.regs.set(chnl_reg(channel, TX_LEN_REG), len.div_ceil(WORD_SIZE) as u32);
        self.regs.set(chnl_reg(channel, TX_OFFLAST_REG), pack_offlast(offset, last));
        self.regs.raise(channel, Direction::Receive, Signal::NewTxn);
    }

    /// Scatter `data` (padded to whole words) along the receive list,
    /// report the words moved and latch receive done
    pub fn deliver(&self, channel: usize, data: &[u8]) {
        let mut padded = data.to_vec();
        padded.resize(data.len().div_ceil(WORD_SIZE) * WORD_SIZE, 0xA5);
        let mut at = 0;
        for (addr, len) in self.descriptors(channel, Direction::Receive) {
            if at == padded.len() {
                break;
            }
            let take = len.min(padded.len() - at);
            self.mem.write_phys(addr, &padded[at..at + take]);
            at += take;
        }
        self.regs.set(chnl_reg(channel, TX_TNFR_LEN_REG), (at / WORD_SIZE) as u32);
        self.regs.raise(channel, Direction::Receive, Signal::Done);
    }
}
