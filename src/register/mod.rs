//! Register-level access to the FPGA's BAR0
//!
//! The FPGA exposes a flat array of 32-bit registers. Each channel owns a
//! 16-word block at `channel << 4`; the info word and both interrupt vectors
//! sit in channel 0's block.
//!
//! All engine register traffic goes through [`RegisterBank`] so the same state
//! machine runs against real MMIO ([`MmioRegisters`]) or a mock.

pub mod channel;
pub mod info;

use core::ptr::NonNull;

pub use channel::ChannelRegs;
pub use info::DeviceInfo;

/// Info register offset (shared)
pub const INFO_REG: usize = 0xA;
/// Interrupt vector 0 offset (channels 0..5, read clears)
pub const IRQ_0_REG: usize = 0xB;
/// Interrupt vector 1 offset (channels 6..11, read clears)
pub const IRQ_1_REG: usize = 0xC;

/// Word index of register `offset` in channel `channel`'s block
#[inline(always)]
pub const fn chnl_reg(channel: usize, offset: usize) -> usize {
    (channel << 4) + offset
}

/// A bank of 32-bit registers addressed by word index.
///
/// Implementations must be callable from interrupt context: no blocking and
/// no allocation.
pub trait RegisterBank: Send + Sync {
    /// Read the register at word index `index`
    fn read(&self, index: usize) -> u32;

    /// Write `value` to the register at word index `index`
    fn write(&self, index: usize, value: u32);
}

/// Read a 32-bit register at the given address
///
/// # Safety
/// The caller must ensure the address is valid and properly aligned.
#[inline(always)]
pub unsafe fn read_reg(addr: usize) -> u32 {
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

/// Write a 32-bit value to a register at the given address
///
/// # Safety
/// The caller must ensure the address is valid and properly aligned.
#[inline(always)]
pub unsafe fn write_reg(addr: usize, value: u32) {
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
}

/// Memory-mapped BAR0 register bank.
pub struct MmioRegisters {
    base: NonNull<u32>,
    len: usize,
}

// SAFETY: every access is a single volatile 32-bit load or store; the
// hardware serializes them.
unsafe impl Send for MmioRegisters {}
// SAFETY: see above.
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Wrap a mapped BAR of `len` 32-bit words.
    ///
    /// Returns `None` for a null base.
    ///
    /// # Safety
    /// `base` must point to a mapping of at least `len` words that stays
    /// valid for the lifetime of the returned value.
    pub unsafe fn new(base: *mut u32, len: usize) -> Option<Self> {
        NonNull::new(base).map(|base| Self { base, len })
    }

    /// Number of 32-bit registers in the mapping
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    fn addr(&self, index: usize) -> usize {
        debug_assert!(index < self.len, "register index {index} out of range");
        // SAFETY: in range per the contract of `new`
        unsafe { self.base.as_ptr().add(index) as usize }
    }
}

impl RegisterBank for MmioRegisters {
    #[inline(always)]
    fn read(&self, index: usize) -> u32 {
        // SAFETY: address derived from a valid mapping
        unsafe { read_reg(self.addr(index)) }
    }

    #[inline(always)]
    fn write(&self, index: usize, value: u32) {
        // SAFETY: address derived from a valid mapping
        unsafe { write_reg(self.addr(index), value) }
    }
}

/// Accessors for the registers shared by all channels
pub struct SharedRegs<'a> {
    bank: &'a dyn RegisterBank,
}

impl<'a> SharedRegs<'a> {
    /// Create a view over the shared registers
    pub fn new(bank: &'a dyn RegisterBank) -> Self {
        Self { bank }
    }

    /// Read the raw info word
    #[inline(always)]
    pub fn info(&self) -> u32 {
        self.bank.read(chnl_reg(0, INFO_REG))
    }

    /// Read (and thereby clear) interrupt vector `index` (0 or 1)
    #[inline(always)]
    pub fn take_vector(&self, index: usize) -> u32 {
        let offset = if index == 0 { IRQ_0_REG } else { IRQ_1_REG };
        self.bank.read(chnl_reg(0, offset))
    }
}

// =============================================================================
// Register Access Macros
// =============================================================================

/// Generate read/write accessor methods for a per-channel register.
///
/// # Example
/// ```ignore
/// impl ChannelRegs<'_> {
///     chnl_reg_rw!(rx_len, set_rx_len, RX_LEN_REG, "RX transfer length (words)");
/// }
/// ```
macro_rules! chnl_reg_rw {
    ($read_fn:ident, $write_fn:ident, $offset:expr, $doc:expr) => {
        #[doc = concat!("Read ", $doc)]
        #[inline(always)]
        pub fn $read_fn(&self) -> u32 {
            self.bank
                .read($crate::register::chnl_reg(self.channel, $offset))
        }

        #[doc = concat!("Write ", $doc)]
        #[inline(always)]
        pub fn $write_fn(&self, value: u32) {
            self.bank
                .write($crate::register::chnl_reg(self.channel, $offset), value)
        }
    };
}

/// Generate a read-only accessor method for a per-channel register.
macro_rules! chnl_reg_ro {
    ($read_fn:ident, $offset:expr, $doc:expr) => {
        #[doc = concat!("Read ", $doc)]
        #[inline(always)]
        pub fn $read_fn(&self) -> u32 {
            self.bank
                .read($crate::register::chnl_reg(self.channel, $offset))
        }
    };
}

// Export macros for use in submodules
pub(crate) use chnl_reg_ro;
pub(crate) use chnl_reg_rw;
